//! Electrum client
//!
//! Wraps the blocking [`electrum_client::Client`] behind the async
//! [`ChainSource`] seam. Every call runs on the blocking pool. One connection
//! is kept open and reused; it is dropped and re-established after any
//! transport error. `tcp://` and `ssl://` endpoints are supported, optionally
//! through a SOCKS5 proxy.

use crate::source::{ChainSource, HistoryEntry};
use crate::{Error, Result};
use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Script, Transaction, Txid};
use electrum_client::{Client, ConfigBuilder, ElectrumApi, Socks5Config};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Retry configuration for connecting
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum connection attempts
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn next_backoff(&self, backoff: Duration) -> Duration {
        let next = Duration::from_millis((backoff.as_millis() as f64 * self.backoff_multiplier) as u64);
        next.min(self.max_backoff)
    }
}

/// Electrum client configuration
#[derive(Debug, Clone)]
pub struct ElectrumConfig {
    /// `tcp://host:port`, `ssl://host:port` or `host:port`
    pub endpoint: String,
    /// SOCKS5 proxy as `socks5://host:port` or `host:port`
    pub socks5_proxy: Option<String>,
    /// Connection retry policy
    pub retry: RetryConfig,
    /// Limit for connecting and for each request
    pub request_timeout: Duration,
}

impl ElectrumConfig {
    /// Direct connection to `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            socks5_proxy: None,
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Route the connection through a SOCKS5 proxy
    pub fn with_socks5(mut self, proxy: impl Into<String>) -> Self {
        self.socks5_proxy = Some(proxy.into());
        self
    }

    fn client_config(&self) -> Result<electrum_client::Config> {
        // socket timeouts are whole seconds in 1..=255
        let secs = self.request_timeout.as_secs().clamp(1, u64::from(u8::MAX)) as u8;
        let socks5 = self
            .socks5_proxy
            .as_deref()
            .map(proxy_address)
            .transpose()?
            .map(Socks5Config::new);
        Ok(ConfigBuilder::new()
            .timeout(Some(secs))
            .retry(0)
            .socks5(socks5)
            .build())
    }
}

/// Validated server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address, IPv6 without brackets
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Whether the transport is TLS
    pub tls: bool,
}

impl Endpoint {
    /// URL in the form `electrum_client` expects
    pub fn url(&self) -> String {
        let scheme = if self.tls { "ssl" } else { "tcp" };
        if self.host.contains(':') {
            format!("{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Split an endpoint into host, port and transport
///
/// A missing scheme means plain TCP.
pub fn parse_endpoint(endpoint: &str) -> Result<Endpoint> {
    let endpoint = endpoint.trim();
    let (rest, tls) = if let Some(rest) = endpoint.strip_prefix("tcp://") {
        (rest, false)
    } else if let Some(rest) = endpoint.strip_prefix("ssl://") {
        (rest, true)
    } else if endpoint.contains("://") {
        return Err(Error::InvalidEndpoint(format!(
            "{}: unknown scheme",
            endpoint
        )));
    } else {
        (endpoint, false)
    };

    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidEndpoint(format!("{}: missing port", endpoint)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::InvalidEndpoint(format!("{}: missing host", endpoint)));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidEndpoint(format!("{}: bad port '{}'", endpoint, port)))?;
    Ok(Endpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

fn proxy_address(proxy: &str) -> Result<String> {
    let address = proxy
        .strip_prefix("socks5h://")
        .or_else(|| proxy.strip_prefix("socks5://"))
        .unwrap_or(proxy);
    if address.contains("://") || !address.contains(':') {
        return Err(Error::InvalidEndpoint(format!("bad SOCKS5 proxy '{}'", proxy)));
    }
    Ok(address.to_string())
}

/// Electrum script hash: SHA256 of the script, byte-reversed, hex
pub fn script_hash(script: &Script) -> String {
    let mut hash = sha256::Hash::hash(script.as_bytes()).to_byte_array();
    hash.reverse();
    hex::encode(hash)
}

fn jitter_duration(duration: Duration) -> Duration {
    let millis = duration.as_millis() as u64;
    if millis == 0 {
        return duration;
    }
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    let jittered = (millis as f64 * jitter) as u64;
    Duration::from_millis(jittered.max(1))
}

/// Electrum server client
pub struct ElectrumClient {
    config: ElectrumConfig,
    endpoint: Endpoint,
    conn: Mutex<Option<Arc<Client>>>,
}

impl ElectrumClient {
    /// Create client with default configuration
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Self::with_config(ElectrumConfig::new(endpoint))
    }

    /// Create client with custom configuration
    ///
    /// The endpoint is validated here; no connection is made until the first
    /// request.
    pub fn with_config(config: ElectrumConfig) -> Result<Self> {
        let endpoint = parse_endpoint(&config.endpoint)?;
        config.client_config()?;
        Ok(Self {
            config,
            endpoint,
            conn: Mutex::new(None),
        })
    }

    /// Get current endpoint
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Check if a connection is open
    pub fn is_connected(&self) -> bool {
        self.conn
            .try_lock()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }

    /// Connect with retry, replacing any open connection
    pub async fn connect(&self) -> Result<()> {
        let client = self.connect_with_retry().await?;
        *self.conn.lock().await = Some(client);
        Ok(())
    }

    /// Close the connection
    pub async fn disconnect(&self) {
        *self.conn.lock().await = None;
        info!("Disconnected from {}", self.config.endpoint);
    }

    async fn connect_with_retry(&self) -> Result<Arc<Client>> {
        let mut attempt = 0;
        let mut backoff = self.config.retry.initial_backoff;

        loop {
            match self.try_connect().await {
                Ok(client) => {
                    info!("Connected to Electrum server at {}", self.config.endpoint);
                    return Ok(Arc::new(client));
                }
                Err(e @ Error::InvalidEndpoint(_)) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.retry.max_attempts {
                        error!("Failed to connect after {} attempts: {}", attempt, e);
                        return Err(Error::Connection(format!(
                            "{} unreachable after {} attempts: {}",
                            self.config.endpoint, attempt, e
                        )));
                    }

                    warn!(
                        "Connection attempt {} failed, retrying in {:?}: {}",
                        attempt, backoff, e
                    );
                    tokio::time::sleep(jitter_duration(backoff)).await;
                    backoff = self.config.retry.next_backoff(backoff);
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<Client> {
        let url = self.endpoint.url();
        let config = self.config.client_config()?;
        debug!(
            "Connecting to {} (proxy: {})",
            url,
            self.config.socks5_proxy.is_some()
        );
        let open = tokio::task::spawn_blocking(move || Client::from_config(&url, config));
        match tokio::time::timeout(self.config.request_timeout, open).await {
            Err(_) => Err(Error::Timeout(self.config.request_timeout)),
            Ok(Err(join)) => Err(Error::Connection(format!("connect task failed: {}", join))),
            Ok(Ok(client)) => Ok(client?),
        }
    }

    async fn client(&self) -> Result<Arc<Client>> {
        let mut guard = self.conn.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = self.connect_with_retry().await?;
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Run one blocking request on the pool, connecting first if needed
    async fn call<T, F>(&self, method: &'static str, request: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> std::result::Result<T, electrum_client::Error> + Send + 'static,
    {
        let client = self.client().await?;
        let task = tokio::task::spawn_blocking(move || request(&client));
        let result = match tokio::time::timeout(self.config.request_timeout, task).await {
            Err(_) => {
                *self.conn.lock().await = None;
                return Err(Error::Timeout(self.config.request_timeout));
            }
            Ok(Err(join)) => {
                return Err(Error::Connection(format!("{} task failed: {}", method, join)))
            }
            Ok(Ok(result)) => result,
        };

        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let e = Error::from(e);
                if e.is_transport() {
                    warn!("Dropping connection after {} failed: {}", method, e);
                    *self.conn.lock().await = None;
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ElectrumClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectrumClient")
            .field("endpoint", &self.config.endpoint)
            .field("tls", &self.endpoint.tls)
            .field("proxied", &self.config.socks5_proxy.is_some())
            .finish()
    }
}

#[async_trait]
impl ChainSource for ElectrumClient {
    async fn tip_height(&self) -> Result<u32> {
        let header = self
            .call("blockchain.headers.subscribe", |c| c.block_headers_subscribe())
            .await?;
        u32::try_from(header.height)
            .map_err(|_| Error::Protocol(format!("headers.subscribe: height {}", header.height)))
    }

    async fn script_history(&self, script: &Script) -> Result<Vec<HistoryEntry>> {
        let script = script.to_owned();
        let history = self
            .call("blockchain.scripthash.get_history", move |c| {
                c.script_get_history(&script)
            })
            .await?;
        Ok(history
            .into_iter()
            .map(|item| HistoryEntry::from_electrum(item.tx_hash, i64::from(item.height)))
            .collect())
    }

    async fn transaction(&self, txid: &Txid) -> Result<Transaction> {
        let requested = *txid;
        let tx = self
            .call("blockchain.transaction.get", move |c| c.transaction_get(&requested))
            .await?;
        if tx.compute_txid() != *txid {
            return Err(Error::Protocol(format!(
                "server returned {} for {}",
                tx.compute_txid(),
                txid
            )));
        }
        Ok(tx)
    }

    async fn block_time(&self, height: u32) -> Result<u64> {
        let header = self
            .call("blockchain.block.header", move |c| c.block_header(height as usize))
            .await?;
        Ok(u64::from(header.time))
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        let tx = tx.clone();
        let txid = self
            .call("blockchain.transaction.broadcast", move |c| {
                c.transaction_broadcast(&tx)
            })
            .await?;
        info!("Broadcast {}", txid);
        Ok(txid)
    }
}

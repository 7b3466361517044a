//! Wallet registry and boundary operations
//!
//! Each open wallet lives in a session behind a [`WalletHandle`].
//! Sessions are shared with `Arc`, so a destroyed handle stops resolving
//! immediately while operations already running on it finish normally.

use crate::config::ServiceConfig;
use crate::logging;
use crate::models::{
    decode_psbt, decode_transaction, encode_psbt, parse_address, parse_outpoint,
    CreateTxRequest, CreateTxResponse, FinalizeResponse, PublicDescriptors, SignResponse,
    SyncSummary, TransactionDetailsView, UtxoView, WalletConstructor,
};
use bitcoin::consensus::encode;
use descwallet_core::{
    keys, Error, ExtendedKeys, FeeRate, Result, TxBuilder, Wallet, WalletConfig,
};
use descwallet_params::NetworkType;
use descwallet_storage_sqlite::WalletStore;
use descwallet_sync_electrum::{
    CancelReason, CancelToken, ChainSource, ElectrumClient, ElectrumConfig, SyncConfig,
    SyncEngine,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opaque reference to an open wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletHandle(pub u64);

impl fmt::Display for WalletHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct WalletSession {
    name: String,
    wallet: Wallet,
    store: WalletStore,
    chain: Arc<dyn ChainSource>,
    sync_lock: tokio::sync::Mutex<()>,
    cancel: Mutex<Option<CancelToken>>,
}

impl WalletSession {
    fn persist(&self) -> Result<()> {
        self.store.persist(&self.wallet)?;
        Ok(())
    }

    /// Run `f` off the async workers; sqlite calls block
    async fn blocking<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&WalletSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&session))
            .await
            .map_err(|e| Error::Storage(format!("storage task failed: {}", e)))?
    }
}

/// Registry of open wallets
pub struct WalletService {
    config: ServiceConfig,
    sessions: RwLock<HashMap<WalletHandle, Arc<WalletSession>>>,
    next_handle: AtomicU64,
}

impl WalletService {
    /// Create service
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Install logging and read configuration from the environment
    pub fn from_env() -> Self {
        logging::init();
        Self::new(ServiceConfig::from_env())
    }

    /// Get configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Number of open wallets
    pub fn open_wallets(&self) -> usize {
        self.sessions.read().len()
    }

    fn session(&self, handle: WalletHandle) -> Result<Arc<WalletSession>> {
        self.sessions
            .read()
            .get(&handle)
            .cloned()
            .ok_or(Error::InvalidHandle(handle.0))
    }

    /// Open a wallet backed by the Electrum server in the request
    pub fn constructor(&self, request: WalletConstructor) -> Result<WalletHandle> {
        let mut electrum = ElectrumConfig::new(request.electrum_url.clone());
        electrum.retry = self.config.retry.clone();
        electrum.request_timeout = self.config.request_timeout;
        if let Some(proxy) = &request.electrum_proxy {
            electrum = electrum.with_socks5(proxy.clone());
        }
        let client = ElectrumClient::with_config(electrum).map_err(Error::from)?;
        self.constructor_with_source(request, Arc::new(client))
    }

    /// Open a wallet backed by `chain`
    ///
    /// The database is `<path>/<name>.sqlite`. Existing state is restored when
    /// the file was created for the same descriptors and network.
    pub fn constructor_with_source(
        &self,
        request: WalletConstructor,
        chain: Arc<dyn ChainSource>,
    ) -> Result<WalletHandle> {
        validate_name(&request.name)?;

        let mut config = WalletConfig::for_network(request.network);
        if let Some(policy) = request.pending_spend_policy {
            config.pending_spend_policy = policy;
        }
        if let Some(policy) = request.rotation_policy {
            config.rotation_policy = policy;
        }
        if let Some(gap_limit) = request.gap_limit {
            config.gap_limit = gap_limit.max(1);
        }

        std::fs::create_dir_all(&request.path)?;
        let db_path = database_path(&request.path, &request.name);
        let store = WalletStore::open(&db_path)?;
        let wallet = store.open_wallet(
            config,
            &request.descriptor,
            request.change_descriptor.as_deref(),
        )?;

        let handle = WalletHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let session = WalletSession {
            name: request.name,
            wallet,
            store,
            chain,
            sync_lock: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(None),
        };
        info!(
            "Opened wallet {} as handle {} ({})",
            session.name,
            handle,
            db_path.display()
        );
        self.sessions.write().insert(handle, Arc::new(session));
        Ok(handle)
    }

    /// Close a wallet; a running sync on it is cancelled
    pub fn destructor(&self, handle: WalletHandle) -> Result<()> {
        let session = self
            .sessions
            .write()
            .remove(&handle)
            .ok_or(Error::InvalidHandle(handle.0))?;
        if let Some(cancel) = session.cancel.lock().take() {
            cancel.cancel(CancelReason::WalletClosed);
        }
        info!("Closed wallet {} (handle {})", session.name, handle);
        Ok(())
    }

    /// Scan the chain and merge the result
    ///
    /// Fails with `SyncInProgress` while another sync on the same handle runs.
    /// On timeout or cancellation nothing is applied.
    pub async fn sync(&self, handle: WalletHandle, max_address: Option<u32>) -> Result<SyncSummary> {
        let session = self.session(handle)?;
        let _guard = session
            .sync_lock
            .try_lock()
            .map_err(|_| Error::SyncInProgress(session.name.clone()))?;

        let cancel = CancelToken::new();
        *session.cancel.lock() = Some(cancel.clone());
        let engine = SyncEngine::with_config(
            Arc::clone(&session.chain),
            SyncConfig {
                max_address,
                ..SyncConfig::default()
            },
        )
        .with_cancel(cancel);

        let timeout = self.config.sync_timeout;
        let result = tokio::time::timeout(timeout, engine.sync(&session.wallet)).await;
        session.cancel.lock().take();

        let outcome = match result {
            Err(_) => {
                warn!("Sync of {} timed out after {:?}", session.name, timeout);
                return Err(Error::SyncTimeout(timeout));
            }
            Ok(outcome) => outcome.map_err(Error::from)?,
        };

        let delta = session
            .blocking(move |session| {
                session
                    .wallet
                    .apply_sync_then(outcome.scripts, outcome.chain, |wallet| {
                        session.store.persist(wallet)?;
                        Ok(())
                    })
            })
            .await?;

        let summary = SyncSummary {
            tip_height: session.wallet.tip_height(),
            new_utxos: delta.new_utxos.len(),
            updated_transactions: delta.updated_transactions.len(),
            evicted_transactions: delta.evicted_transactions.len(),
            balance: session.wallet.balance(),
        };
        info!(
            "Synced {} to {}: {} new utxos, {} updated, {} evicted transactions",
            session.name,
            summary.tip_height,
            summary.new_utxos,
            summary.updated_transactions,
            summary.evicted_transactions
        );
        Ok(summary)
    }

    /// Cancel the running sync; returns whether one was running
    pub fn cancel_sync(&self, handle: WalletHandle) -> Result<bool> {
        let session = self.session(handle)?;
        let cancel = session.cancel.lock().clone();
        match cancel {
            Some(cancel) => {
                cancel.cancel(CancelReason::Requested);
                debug!("Cancel requested for {}", session.name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reveal and persist the next receive address
    pub fn get_new_address(&self, handle: WalletHandle) -> Result<String> {
        let session = self.session(handle)?;
        let address = session.wallet.get_new_address()?;
        session.persist()?;
        Ok(address.to_string())
    }

    /// Balance in satoshis
    pub fn get_balance(&self, handle: WalletHandle) -> Result<u64> {
        Ok(self.session(handle)?.wallet.balance())
    }

    /// Unspent outputs
    pub fn list_unspent(&self, handle: WalletHandle) -> Result<Vec<UtxoView>> {
        let session = self.session(handle)?;
        Ok(session
            .wallet
            .list_unspent()
            .iter()
            .map(UtxoView::from)
            .collect())
    }

    /// Transaction summaries, with full transactions when `include_raw`
    pub fn list_transactions(
        &self,
        handle: WalletHandle,
        include_raw: bool,
    ) -> Result<Vec<TransactionDetailsView>> {
        let session = self.session(handle)?;
        Ok(session
            .wallet
            .list_transactions(include_raw)
            .iter()
            .map(TransactionDetailsView::from)
            .collect())
    }

    /// Fresh mnemonic and its master keys
    pub fn generate_extended_key(network: NetworkType, word_count: usize) -> Result<ExtendedKeys> {
        let pair = keys::generate(network, word_count)?;
        Ok(ExtendedKeys::from(&pair))
    }

    /// Master keys of an existing mnemonic
    pub fn create_extended_keys(network: NetworkType, mnemonic: &str) -> Result<ExtendedKeys> {
        let pair = keys::from_mnemonic(network, mnemonic)?;
        Ok(ExtendedKeys::from(&pair))
    }

    /// Build an unsigned transaction
    pub fn create_transaction(
        &self,
        handle: WalletHandle,
        request: &CreateTxRequest,
    ) -> Result<CreateTxResponse> {
        let session = self.session(handle)?;
        let network = session.wallet.network();

        let mut builder = TxBuilder::new(network);
        for addressee in &request.addressees {
            let address = parse_address(&addressee.address, network)?;
            builder.add_recipient(address.script_pubkey(), addressee.amount);
        }
        builder.fee_rate(FeeRate::from_sat_per_vb(request.fee_rate));
        if let Some(strategy) = request.strategy {
            builder.strategy(strategy);
        }
        if request.send_all {
            builder.send_all();
        }
        if let Some(utxos) = &request.utxos {
            let outpoints = utxos
                .iter()
                .map(|o| parse_outpoint(o))
                .collect::<Result<Vec<_>>>()?;
            builder.add_utxos(outpoints);
        }
        if let Some(unspendable) = &request.unspendable {
            let outpoints = unspendable
                .iter()
                .map(|o| parse_outpoint(o))
                .collect::<Result<Vec<_>>>()?;
            builder.add_unspendable(outpoints);
        }

        let result = session.wallet.create_tx(&builder)?;
        if result.change.is_some() {
            session.persist()?;
        }
        Ok(CreateTxResponse {
            details: TransactionDetailsView::from(&result.details),
            psbt: encode_psbt(&result.psbt),
        })
    }

    /// Sign wallet-owned inputs of a base64 PSBT
    pub fn sign(&self, handle: WalletHandle, psbt: &str) -> Result<SignResponse> {
        let session = self.session(handle)?;
        let result = session.wallet.sign(decode_psbt(psbt)?)?;
        debug!("Signed PSBT for {}: {:?}", session.name, result.lifecycle());
        Ok(SignResponse {
            psbt: encode_psbt(&result.psbt),
            finalized: result.finalized,
        })
    }

    /// Extract the network transaction from a fully signed base64 PSBT
    pub fn finalize(psbt: &str) -> Result<FinalizeResponse> {
        let tx = descwallet_core::finalize(decode_psbt(psbt)?)?;
        Ok(FinalizeResponse {
            txid: tx.compute_txid().to_string(),
            transaction: encode::serialize_hex(&tx),
        })
    }

    /// Send a raw transaction and record it as unconfirmed
    pub async fn broadcast(&self, handle: WalletHandle, raw_tx: &str) -> Result<String> {
        let session = self.session(handle)?;
        let tx = decode_transaction(raw_tx)?;
        let txid = session.chain.broadcast(&tx).await.map_err(|e| match e {
            descwallet_sync_electrum::Error::Rpc { code, message } => {
                Error::BroadcastFailed(format!("{} ({})", message, code))
            }
            other => Error::from(other),
        })?;
        session
            .blocking(move |session| {
                session.wallet.insert_broadcast(tx);
                session.persist()
            })
            .await?;
        info!("Broadcast {} from {}", txid, session.name);
        Ok(txid.to_string())
    }

    /// Descriptors without private keys
    pub fn public_descriptors(&self, handle: WalletHandle) -> Result<PublicDescriptors> {
        let session = self.session(handle)?;
        let (external, internal) = session.wallet.public_descriptors()?;
        Ok(PublicDescriptors { external, internal })
    }

    /// Unconfirm everything at or above `from_height`
    pub fn reorg(&self, handle: WalletHandle, from_height: u32) -> Result<Vec<String>> {
        let session = self.session(handle)?;
        let reverted = session.wallet.apply_reorg(from_height);
        session.persist()?;
        debug!("Reorg of {} from height {}", session.name, from_height);
        Ok(reverted.iter().map(|txid| txid.to_string()).collect())
    }
}

impl Default for WalletService {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(Error::Storage(format!("Invalid wallet name {:?}", name)));
    }
    Ok(())
}

fn database_path(dir: &std::path::Path, name: &str) -> PathBuf {
    dir.join(format!("{}.sqlite", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("savings_1").is_ok());
        assert!(validate_name("hot-wallet").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("a b").is_err());
    }

    #[test]
    fn test_database_path() {
        let path = database_path(std::path::Path::new("/tmp/wallets"), "main");
        assert_eq!(path, PathBuf::from("/tmp/wallets/main.sqlite"));
    }

    #[test]
    fn test_unknown_handle() {
        let service = WalletService::default();
        assert!(matches!(
            service.get_balance(WalletHandle(42)),
            Err(Error::InvalidHandle(42))
        ));
        assert!(matches!(
            service.destructor(WalletHandle(42)),
            Err(Error::InvalidHandle(42))
        ));
    }

    #[test]
    fn test_extended_keys() {
        let keys = WalletService::generate_extended_key(NetworkType::Testnet, 12).unwrap();
        assert_eq!(keys.mnemonic.split(' ').count(), 12);
        let again = WalletService::create_extended_keys(NetworkType::Testnet, &keys.mnemonic).unwrap();
        assert_eq!(keys, again);
        assert!(matches!(
            WalletService::generate_extended_key(NetworkType::Testnet, 13),
            Err(Error::InvalidWordCount(13))
        ));
    }
}

//! Gap-limit scan of wallet scripts

use crate::cancel::CancelToken;
use crate::progress::{SyncProgress, SyncStage};
use crate::source::ChainSource;
use crate::{Error, Result};
use bitcoin::Txid;
use descwallet_core::{ChainSnapshot, ChainTx, ScriptMap, Wallet};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Sync configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Scan at least this many indices of each ranged keychain
    pub max_address: Option<u32>,
    /// Look up block timestamps for confirmed transactions
    pub fetch_block_times: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_address: None,
            fetch_block_times: true,
        }
    }
}

/// Result of a complete scan, ready for [`Wallet::apply_sync`]
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Every script that was queried
    pub scripts: ScriptMap,
    /// Tip and transactions touching those scripts
    pub chain: ChainSnapshot,
}

/// Sync engine
///
/// Walks each keychain from index 0 until `gap_limit` consecutive scripts
/// have no history, then downloads every transaction found. Cancellation is
/// checked around every request.
pub struct SyncEngine {
    source: Arc<dyn ChainSource>,
    config: SyncConfig,
    cancel: CancelToken,
    progress: SyncProgress,
}

impl SyncEngine {
    /// Create engine with default configuration
    pub fn new(source: Arc<dyn ChainSource>) -> Self {
        Self::with_config(source, SyncConfig::default())
    }

    /// Create engine with custom configuration
    pub fn with_config(source: Arc<dyn ChainSource>, config: SyncConfig) -> Self {
        Self {
            source,
            config,
            cancel: CancelToken::new(),
            progress: SyncProgress::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the running scan
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Progress of the running scan
    pub fn progress(&self) -> SyncProgress {
        self.progress.clone()
    }

    /// Get configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn guarded<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        if let Some(reason) = self.cancel.reason() {
            debug!("Sync stopped: {}", reason);
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            reason = self.cancel.cancelled() => {
                debug!("Sync stopped mid-request: {}", reason);
                Err(Error::Cancelled)
            }
            result = request => result,
        }
    }

    /// Scan all scripts of `wallet` and fetch their transactions
    ///
    /// The wallet is only read. On any error or cancellation nothing is
    /// returned, so a partial scan can never be applied.
    pub async fn sync(&self, wallet: &Wallet) -> Result<SyncOutcome> {
        self.progress.start();
        let tip_height = self.guarded(self.source.tip_height()).await?;
        self.progress.set_tip(tip_height);
        debug!("Sync started at tip {}", tip_height);

        let gap_limit = wallet.config().gap_limit.max(1);
        let mut scripts = ScriptMap::new();
        let mut found: BTreeMap<Txid, Option<u32>> = BTreeMap::new();

        for keychain in wallet.keychains() {
            self.progress.set_stage(SyncStage::Scanning(keychain));
            let ranged = wallet.descriptors().for_keychain(keychain).has_wildcard();
            let mut end = wallet.lookahead_end(keychain);
            if ranged {
                if let Some(min) = self.config.max_address {
                    end = end.max(min);
                }
            }

            let mut index = 0;
            while index < end {
                let derived = wallet.derive_script(keychain, index)?;
                let history = self
                    .guarded(self.source.script_history(&derived.script_pubkey))
                    .await?;
                self.progress.script_scanned();

                if ranged && !history.is_empty() {
                    end = end.max(index.saturating_add(1).saturating_add(gap_limit));
                }
                for entry in history {
                    let height = found.entry(entry.txid).or_insert(entry.height);
                    if height.is_none() {
                        *height = entry.height;
                    }
                }
                scripts.insert(derived.script_pubkey, (keychain, index));
                index += 1;
            }
            debug!("Scanned {} {} scripts", index, keychain);
        }

        self.progress.set_stage(SyncStage::FetchingTransactions);
        self.progress.set_transactions_total(found.len() as u64);
        let mut block_times: BTreeMap<u32, u64> = BTreeMap::new();
        let mut transactions = Vec::with_capacity(found.len());
        for (txid, height) in found {
            let tx = self.guarded(self.source.transaction(&txid)).await?;
            let block_time = match height {
                Some(h) if self.config.fetch_block_times => match block_times.get(&h) {
                    Some(time) => Some(*time),
                    None => {
                        let time = self.guarded(self.source.block_time(h)).await?;
                        block_times.insert(h, time);
                        Some(time)
                    }
                },
                _ => None,
            };
            transactions.push(ChainTx {
                tx,
                height,
                block_time,
            });
            self.progress.transaction_fetched();
        }

        self.progress.set_stage(SyncStage::Complete);
        info!(
            "Sync scanned {} scripts, found {} transactions at tip {}",
            scripts.len(),
            transactions.len(),
            tip_height
        );
        Ok(SyncOutcome {
            scripts,
            chain: ChainSnapshot {
                tip_height,
                transactions,
            },
        })
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

//! Chain data source abstraction

use crate::Result;
use async_trait::async_trait;
use bitcoin::{Script, Transaction, Txid};

/// One history item of a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistoryEntry {
    /// Transaction touching the script
    pub txid: Txid,
    /// Confirmation height, `None` while in the mempool
    pub height: Option<u32>,
}

impl HistoryEntry {
    /// Entry from an Electrum height, where 0 and -1 mean unconfirmed
    pub fn from_electrum(txid: Txid, height: i64) -> Self {
        let height = u32::try_from(height).ok().filter(|h| *h > 0);
        Self { txid, height }
    }
}

/// Source of chain data for wallet scripts
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current best block height
    async fn tip_height(&self) -> Result<u32>;

    /// Transactions funding or spending `script`
    async fn script_history(&self, script: &Script) -> Result<Vec<HistoryEntry>>;

    /// Full transaction by id
    async fn transaction(&self, txid: &Txid) -> Result<Transaction>;

    /// Timestamp of the block at `height`
    async fn block_time(&self, height: u32) -> Result<u64>;

    /// Submit a signed transaction to the network
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid>;
}

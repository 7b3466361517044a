//! In-memory chain source for tests

use crate::source::{ChainSource, HistoryEntry};
use crate::{Error, Result};
use async_trait::async_trait;
use bitcoin::{Script, Transaction, Txid};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryChain {
    tip_height: u32,
    transactions: BTreeMap<Txid, (Transaction, Option<u32>)>,
    block_times: BTreeMap<u32, u64>,
    broadcasts: Vec<Transaction>,
    unreachable: bool,
    delay: Option<Duration>,
}

/// Chain source backed by a map of transactions
#[derive(Debug, Default)]
pub struct MemoryChainSource {
    chain: Mutex<MemoryChain>,
    history_calls: AtomicUsize,
}

impl MemoryChainSource {
    /// Empty chain at height 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tip height
    pub fn set_tip(&self, height: u32) {
        self.chain.lock().tip_height = height;
    }

    /// Add a transaction, confirmed at `height` or unconfirmed; raises the tip if needed
    pub fn add_transaction(&self, tx: Transaction, height: Option<u32>) -> Txid {
        let txid = tx.compute_txid();
        let mut chain = self.chain.lock();
        if let Some(h) = height {
            chain.tip_height = chain.tip_height.max(h);
        }
        chain.transactions.insert(txid, (tx, height));
        txid
    }

    /// Override the block time at `height`
    pub fn set_block_time(&self, height: u32, time: u64) {
        self.chain.lock().block_times.insert(height, time);
    }

    /// Make every call fail as if the server were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.chain.lock().unreachable = unreachable;
    }

    /// Delay every history request
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.chain.lock().delay = delay;
    }

    /// Transactions received through [`ChainSource::broadcast`]
    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.chain.lock().broadcasts.clone()
    }

    /// Number of history requests served
    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::Relaxed)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.chain.lock().unreachable {
            return Err(Error::Connection("memory chain is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainSource for MemoryChainSource {
    async fn tip_height(&self) -> Result<u32> {
        self.check_reachable()?;
        Ok(self.chain.lock().tip_height)
    }

    async fn script_history(&self, script: &Script) -> Result<Vec<HistoryEntry>> {
        self.check_reachable()?;
        let delay = self.chain.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.history_calls.fetch_add(1, Ordering::Relaxed);

        let chain = self.chain.lock();
        let mut history = BTreeSet::new();
        for (txid, (tx, height)) in &chain.transactions {
            let funds = tx.output.iter().any(|o| o.script_pubkey.as_script() == script);
            let spends = tx.input.iter().any(|input| {
                chain
                    .transactions
                    .get(&input.previous_output.txid)
                    .and_then(|(prev, _)| prev.output.get(input.previous_output.vout as usize))
                    .map_or(false, |o| o.script_pubkey.as_script() == script)
            });
            if funds || spends {
                history.insert(HistoryEntry {
                    txid: *txid,
                    height: *height,
                });
            }
        }
        Ok(history.into_iter().collect())
    }

    async fn transaction(&self, txid: &Txid) -> Result<Transaction> {
        self.check_reachable()?;
        self.chain
            .lock()
            .transactions
            .get(txid)
            .map(|(tx, _)| tx.clone())
            .ok_or_else(|| Error::Rpc {
                code: -5,
                message: format!("no such transaction {}", txid),
            })
    }

    async fn block_time(&self, height: u32) -> Result<u64> {
        self.check_reachable()?;
        let chain = self.chain.lock();
        Ok(chain
            .block_times
            .get(&height)
            .copied()
            .unwrap_or(1_600_000_000 + u64::from(height) * 600))
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        self.check_reachable()?;
        let mut chain = self.chain.lock();
        let txid = tx.compute_txid();
        chain.broadcasts.push(tx.clone());
        chain.transactions.insert(txid, (tx.clone(), None));
        Ok(txid)
    }
}

//! UTXO and transaction index
//!
//! The index is a sequence of immutable [`IndexSnapshot`]s. A single writer
//! builds the next snapshot from the current one plus new chain data and
//! swaps it in under a short write lock, so readers always see either the
//! state before or after an update, never a mix.

use crate::types::{KeychainKind, TransactionDetails, TxLifecycle, Utxo};
use bitcoin::{OutPoint, ScriptBuf, Transaction, TxOut, Txid};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Owning keychain and derivation index of each tracked script
pub type ScriptMap = BTreeMap<ScriptBuf, (KeychainKind, u32)>;

/// One transaction as reported by the chain source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTx {
    /// Full transaction
    pub tx: Transaction,
    /// Confirmation height, `None` for mempool transactions
    pub height: Option<u32>,
    /// Block time of the confirming block
    pub block_time: Option<u64>,
}

/// Complete result of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSnapshot {
    /// Chain tip at the time of the sync
    pub tip_height: u32,
    /// Transactions touching the tracked scripts
    pub transactions: Vec<ChainTx>,
}

/// How unconfirmed spends affect the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingSpendPolicy {
    /// Outputs spent by any indexed transaction are excluded immediately
    #[default]
    Deduct,
    /// Outputs stay in the balance until the spending transaction confirms
    ConfirmedOnly,
}

/// Indexed transaction with its chain position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedTx {
    /// Full transaction
    pub tx: Arc<Transaction>,
    /// Confirmation height
    pub height: Option<u32>,
    /// Block time when confirmed, first-seen time otherwise
    pub timestamp: u64,
}

/// Changes produced by one [`UtxoIndex::apply_sync_result`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDelta {
    /// Unspent outputs that were not unspent before
    pub new_utxos: Vec<Utxo>,
    /// Transactions that were added or changed height
    pub updated_transactions: Vec<Txid>,
    /// Unconfirmed transactions dropped as replaced or evicted
    pub evicted_transactions: Vec<Txid>,
}

impl SyncDelta {
    /// Whether the sync changed nothing
    pub fn is_empty(&self) -> bool {
        self.new_utxos.is_empty()
            && self.updated_transactions.is_empty()
            && self.evicted_transactions.is_empty()
    }
}

/// Immutable view of the index
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    tip_height: u32,
    policy: PendingSpendPolicy,
    scripts: Arc<ScriptMap>,
    txs: BTreeMap<Txid, IndexedTx>,
    spent_by: BTreeMap<OutPoint, Txid>,
}

impl IndexSnapshot {
    fn build(
        tip_height: u32,
        policy: PendingSpendPolicy,
        scripts: Arc<ScriptMap>,
        txs: BTreeMap<Txid, IndexedTx>,
    ) -> Self {
        let mut spent_by = BTreeMap::new();
        for (txid, entry) in &txs {
            if entry.tx.is_coinbase() {
                continue;
            }
            for input in &entry.tx.input {
                spent_by.insert(input.previous_output, *txid);
            }
        }
        Self {
            tip_height,
            policy,
            scripts,
            txs,
            spent_by,
        }
    }

    /// Chain tip recorded by the last sync
    pub fn tip_height(&self) -> u32 {
        self.tip_height
    }

    /// Balance policy in effect
    pub fn policy(&self) -> PendingSpendPolicy {
        self.policy
    }

    /// Tracked scripts
    pub fn scripts(&self) -> &ScriptMap {
        &self.scripts
    }

    /// Number of indexed transactions
    pub fn transaction_count(&self) -> usize {
        self.txs.len()
    }

    /// Indexed transactions in txid order
    pub fn entries(&self) -> impl Iterator<Item = (&Txid, &IndexedTx)> + '_ {
        self.txs.iter()
    }

    /// Indexed transaction by id
    pub fn transaction(&self, txid: &Txid) -> Option<&IndexedTx> {
        self.txs.get(txid)
    }

    /// Output referenced by `outpoint`, if its transaction is indexed
    pub fn txout(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.txs
            .get(&outpoint.txid)
            .and_then(|entry| entry.tx.output.get(outpoint.vout as usize))
    }

    fn is_spent(&self, outpoint: &OutPoint) -> bool {
        match self.spent_by.get(outpoint) {
            None => false,
            Some(spender) => match self.policy {
                PendingSpendPolicy::Deduct => true,
                PendingSpendPolicy::ConfirmedOnly => self
                    .txs
                    .get(spender)
                    .is_some_and(|entry| entry.height.is_some()),
            },
        }
    }

    fn owned_outputs(&self) -> impl Iterator<Item = Utxo> + '_ {
        self.txs.iter().flat_map(move |(txid, entry)| {
            entry
                .tx
                .output
                .iter()
                .enumerate()
                .filter_map(move |(vout, txout)| {
                    let (keychain, index) = self.scripts.get(&txout.script_pubkey)?;
                    Some(Utxo {
                        outpoint: OutPoint::new(*txid, vout as u32),
                        txout: txout.clone(),
                        keychain: *keychain,
                        derivation_index: *index,
                        confirmation_height: entry.height,
                    })
                })
        })
    }

    /// Unspent outputs under the balance policy, in outpoint order
    pub fn list_unspent(&self) -> impl Iterator<Item = Utxo> + '_ {
        self.owned_outputs().filter(move |u| !self.is_spent(&u.outpoint))
    }

    /// Outputs no indexed transaction spends, regardless of policy
    pub fn spendable(&self) -> impl Iterator<Item = Utxo> + '_ {
        self.owned_outputs()
            .filter(move |u| !self.spent_by.contains_key(&u.outpoint))
    }

    /// Owned output at `outpoint` that is still spendable
    pub fn spendable_utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        if self.spent_by.contains_key(outpoint) {
            return None;
        }
        let txout = self.txout(outpoint)?;
        let (keychain, index) = self.scripts.get(&txout.script_pubkey)?;
        Some(Utxo {
            outpoint: *outpoint,
            txout: txout.clone(),
            keychain: *keychain,
            derivation_index: *index,
            confirmation_height: self.txs.get(&outpoint.txid).and_then(|e| e.height),
        })
    }

    /// Sum of [`Self::list_unspent`]
    pub fn balance(&self) -> u64 {
        self.list_unspent().map(|u| u.value()).sum()
    }

    /// Derivation indices that appear in any indexed output
    pub fn used_indices(&self, keychain: KeychainKind) -> BTreeSet<u32> {
        self.owned_outputs()
            .filter(|u| u.keychain == keychain)
            .map(|u| u.derivation_index)
            .collect()
    }

    /// Wallet-centric summary of one indexed transaction
    pub fn details(&self, txid: &Txid, include_raw: bool) -> Option<TransactionDetails> {
        let entry = self.txs.get(txid)?;
        let tx = &entry.tx;

        let received = tx
            .output
            .iter()
            .filter(|o| self.scripts.contains_key(&o.script_pubkey))
            .map(|o| o.value.to_sat())
            .sum();

        let mut sent = 0u64;
        let mut input_total = Some(0u64);
        for input in &tx.input {
            match self.txout(&input.previous_output) {
                Some(prev) => {
                    if self.scripts.contains_key(&prev.script_pubkey) {
                        sent += prev.value.to_sat();
                    }
                    input_total = input_total.map(|t| t + prev.value.to_sat());
                }
                None => input_total = None,
            }
        }
        let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        let fee = if tx.is_coinbase() {
            None
        } else {
            input_total.and_then(|t| t.checked_sub(output_total))
        };

        Some(TransactionDetails {
            txid: *txid,
            transaction: include_raw.then(|| Transaction::clone(tx)),
            timestamp: entry.timestamp,
            received,
            sent,
            fee,
            height: entry.height,
        })
    }

    /// Summaries of all indexed transactions, in txid order
    pub fn list_transactions(
        &self,
        include_raw: bool,
    ) -> impl Iterator<Item = TransactionDetails> + '_ {
        self.txs
            .keys()
            .filter_map(move |txid| self.details(txid, include_raw))
    }
}

/// Concurrent UTXO and transaction index
#[derive(Debug)]
pub struct UtxoIndex {
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl UtxoIndex {
    /// Create an empty index
    pub fn new(policy: PendingSpendPolicy) -> Self {
        let snapshot = IndexSnapshot {
            policy,
            ..IndexSnapshot::default()
        };
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// Rebuild an index from persisted state
    pub fn load(
        policy: PendingSpendPolicy,
        tip_height: u32,
        scripts: ScriptMap,
        transactions: impl IntoIterator<Item = IndexedTx>,
    ) -> Self {
        let txs = transactions
            .into_iter()
            .map(|entry| (entry.tx.compute_txid(), entry))
            .collect();
        let snapshot = IndexSnapshot::build(tip_height, policy, Arc::new(scripts), txs);
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read())
    }

    fn swap(&self, next: IndexSnapshot) {
        *self.current.write() = Arc::new(next);
    }

    /// Put back a snapshot taken earlier with [`Self::snapshot`]
    pub fn restore(&self, snapshot: Arc<IndexSnapshot>) {
        let _writer = self.writer.lock();
        *self.current.write() = snapshot;
    }

    /// Merge a complete sync result into the index
    ///
    /// `scripts` are the scripts the chain source was queried for. Idempotent:
    /// applying the same snapshot again changes nothing. A confirmed height
    /// is never cleared here; only [`Self::apply_reorg`] does that.
    ///
    /// Unconfirmed transactions are evicted, together with their unconfirmed
    /// descendants, when they double-spend an input of a confirmed or freshly
    /// reported transaction, or when every wallet script they touch was
    /// queried and the chain source no longer reports them.
    pub fn apply_sync_result(&self, scripts: ScriptMap, chain: ChainSnapshot) -> SyncDelta {
        let _writer = self.writer.lock();
        let old = self.snapshot();

        let queried: BTreeSet<ScriptBuf> = scripts.keys().cloned().collect();
        let reported: BTreeSet<Txid> = chain
            .transactions
            .iter()
            .map(|chain_tx| chain_tx.tx.compute_txid())
            .collect();
        let mut merged_scripts = old.scripts.as_ref().clone();
        merged_scripts.extend(scripts);

        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let mut txs = old.txs.clone();
        let mut updated = Vec::new();
        for chain_tx in chain.transactions {
            let txid = chain_tx.tx.compute_txid();
            match txs.get_mut(&txid) {
                Some(existing) => {
                    let current = TxLifecycle::from_height(existing.height);
                    let height = if current
                        .can_transition_to(TxLifecycle::from_height(chain_tx.height))
                    {
                        chain_tx.height
                    } else {
                        existing.height
                    };
                    let timestamp = match (chain_tx.height, chain_tx.block_time) {
                        (Some(_), Some(time)) => time,
                        _ => existing.timestamp,
                    };
                    if height != existing.height || timestamp != existing.timestamp {
                        existing.height = height;
                        existing.timestamp = timestamp;
                        updated.push(txid);
                    }
                }
                None => {
                    let timestamp = chain_tx.block_time.unwrap_or(now);
                    txs.insert(
                        txid,
                        IndexedTx {
                            tx: Arc::new(chain_tx.tx),
                            height: chain_tx.height,
                            timestamp,
                        },
                    );
                    updated.push(txid);
                }
            }
        }

        let evicted = stale_unconfirmed(&txs, &reported, &queried, &merged_scripts);
        for txid in &evicted {
            txs.remove(txid);
        }
        updated.retain(|txid| !evicted.contains(txid));

        let tip_height = chain.tip_height.max(old.tip_height);
        let next = IndexSnapshot::build(tip_height, old.policy, Arc::new(merged_scripts), txs);
        let previously_unspent: BTreeSet<OutPoint> =
            old.list_unspent().map(|u| u.outpoint).collect();
        let new_utxos: Vec<Utxo> = next
            .list_unspent()
            .filter(|u| !previously_unspent.contains(&u.outpoint))
            .collect();

        tracing::info!(
            "Applied sync: tip={}, {} transactions updated, {} evicted, {} new utxos",
            tip_height,
            updated.len(),
            evicted.len(),
            new_utxos.len()
        );
        self.swap(next);
        SyncDelta {
            new_utxos,
            updated_transactions: updated,
            evicted_transactions: evicted.into_iter().collect(),
        }
    }

    /// Record a transaction the wallet itself broadcast
    pub fn insert_unconfirmed(&self, tx: Transaction) -> Txid {
        let txid = tx.compute_txid();
        let _writer = self.writer.lock();
        let old = self.snapshot();
        if old.txs.contains_key(&txid) {
            return txid;
        }
        let mut txs = old.txs.clone();
        txs.insert(
            txid,
            IndexedTx {
                tx: Arc::new(tx),
                height: None,
                timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            },
        );
        self.swap(IndexSnapshot::build(
            old.tip_height,
            old.policy,
            Arc::clone(&old.scripts),
            txs,
        ));
        txid
    }

    /// Reorg notification: unconfirm everything at or above `from_height`
    ///
    /// Returns the transactions that went back to unconfirmed.
    pub fn apply_reorg(&self, from_height: u32) -> Vec<Txid> {
        let _writer = self.writer.lock();
        let old = self.snapshot();
        let mut txs = old.txs.clone();
        let mut reverted = Vec::new();
        for (txid, entry) in txs.iter_mut() {
            let reverts = TxLifecycle::from_height(entry.height)
                .can_revert_to(TxLifecycle::Unconfirmed);
            if reverts && entry.height.is_some_and(|h| h >= from_height) {
                entry.height = None;
                reverted.push(*txid);
            }
        }
        let tip_height = old.tip_height.min(from_height.saturating_sub(1));
        tracing::warn!(
            "Reorg from height {}: {} transactions unconfirmed",
            from_height,
            reverted.len()
        );
        self.swap(IndexSnapshot::build(
            tip_height,
            old.policy,
            Arc::clone(&old.scripts),
            txs,
        ));
        reverted
    }

    /// Add scripts to track without chain data
    pub fn track_scripts(&self, scripts: ScriptMap) {
        let _writer = self.writer.lock();
        let old = self.snapshot();
        let mut merged = old.scripts.as_ref().clone();
        let before = merged.len();
        merged.extend(scripts);
        if merged.len() == before {
            return;
        }
        self.swap(IndexSnapshot::build(
            old.tip_height,
            old.policy,
            Arc::new(merged),
            old.txs.clone(),
        ));
    }
}

/// Unconfirmed transactions that the chain no longer supports
fn stale_unconfirmed(
    txs: &BTreeMap<Txid, IndexedTx>,
    reported: &BTreeSet<Txid>,
    queried: &BTreeSet<ScriptBuf>,
    scripts: &ScriptMap,
) -> BTreeSet<Txid> {
    let evictable = |entry: &IndexedTx| {
        TxLifecycle::from_height(entry.height).can_transition_to(TxLifecycle::Replaced)
    };

    let mut spenders: BTreeMap<OutPoint, Vec<Txid>> = BTreeMap::new();
    for (txid, entry) in txs {
        if entry.tx.is_coinbase() {
            continue;
        }
        for input in &entry.tx.input {
            spenders.entry(input.previous_output).or_default().push(*txid);
        }
    }

    let mut stale = BTreeSet::new();
    for (txid, entry) in txs.iter().filter(|(_, entry)| evictable(entry)) {
        let is_reported = reported.contains(txid);
        let conflicted = entry.tx.input.iter().any(|input| {
            spenders
                .get(&input.previous_output)
                .into_iter()
                .flatten()
                .filter(|other| *other != txid)
                .any(|other| {
                    txs.get(other).is_some_and(|o| o.height.is_some())
                        || (!is_reported && reported.contains(other))
                })
        });
        if conflicted {
            stale.insert(*txid);
            continue;
        }
        if is_reported {
            continue;
        }

        let outputs = entry.tx.output.iter().map(|o| &o.script_pubkey);
        let prevouts = entry.tx.input.iter().filter_map(|input| {
            txs.get(&input.previous_output.txid)
                .and_then(|prev| prev.tx.output.get(input.previous_output.vout as usize))
                .map(|o| &o.script_pubkey)
        });
        let mut touched = outputs
            .chain(prevouts)
            .filter(|s| scripts.contains_key(*s))
            .peekable();
        if touched.peek().is_some() && touched.all(|s| queried.contains(s)) {
            stale.insert(*txid);
        }
    }

    // unconfirmed children of evicted transactions go with them
    loop {
        let orphans: Vec<Txid> = txs
            .iter()
            .filter(|(txid, entry)| evictable(entry) && !stale.contains(*txid))
            .filter(|(_, entry)| {
                entry
                    .tx
                    .input
                    .iter()
                    .any(|input| stale.contains(&input.previous_output.txid))
            })
            .map(|(txid, _)| *txid)
            .collect();
        if orphans.is_empty() {
            break;
        }
        stale.extend(orphans);
    }

    for txid in &stale {
        tracing::debug!("Evicting unconfirmed transaction {}", txid);
    }
    stale
}

impl Default for UtxoIndex {
    fn default() -> Self {
        Self::new(PendingSpendPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, Sequence, TxIn, Witness};

    fn script(n: u8) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array([n; 20]))
    }

    fn scripts() -> ScriptMap {
        (0..4u8)
            .map(|n| (script(n), (KeychainKind::External, n as u32)))
            .collect()
    }

    fn tx(inputs: Vec<OutPoint>, outputs: Vec<(ScriptBuf, u64)>) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs
                .into_iter()
                .map(|previous_output| TxIn {
                    previous_output,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs
                .into_iter()
                .map(|(script_pubkey, value)| TxOut {
                    value: Amount::from_sat(value),
                    script_pubkey,
                })
                .collect(),
        }
    }

    fn foreign_input(n: u8) -> OutPoint {
        OutPoint::new(Txid::from_byte_array([0xf0 + n; 32]), 0)
    }

    fn funding() -> Transaction {
        tx(
            vec![foreign_input(1)],
            vec![(script(0), 50_000), (script(1), 30_000), (script(9), 7_000)],
        )
    }

    fn chain(txs: Vec<(Transaction, Option<u32>)>, tip: u32) -> ChainSnapshot {
        ChainSnapshot {
            tip_height: tip,
            transactions: txs
                .into_iter()
                .map(|(tx, height)| ChainTx {
                    tx,
                    height,
                    block_time: height.map(|h| 1_600_000_000 + h as u64),
                })
                .collect(),
        }
    }

    #[test]
    fn test_balance_matches_unspent() {
        let index = UtxoIndex::default();
        let delta = index.apply_sync_result(scripts(), chain(vec![(funding(), Some(100))], 101));
        assert_eq!(delta.new_utxos.len(), 2);
        assert_eq!(delta.updated_transactions.len(), 1);

        let snapshot = index.snapshot();
        let unspent: Vec<Utxo> = snapshot.list_unspent().collect();
        assert!(!unspent.is_empty());
        assert_eq!(snapshot.balance(), unspent.iter().map(Utxo::value).sum::<u64>());
        assert_eq!(snapshot.balance(), 80_000);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let index = UtxoIndex::default();
        let snapshot = chain(vec![(funding(), Some(100))], 101);
        index.apply_sync_result(scripts(), snapshot.clone());
        let before: Vec<Utxo> = index.snapshot().list_unspent().collect();

        let delta = index.apply_sync_result(scripts(), snapshot);
        assert!(delta.is_empty());
        let after: Vec<Utxo> = index.snapshot().list_unspent().collect();
        assert_eq!(before, after);
        assert_eq!(index.snapshot().balance(), 80_000);
        assert_eq!(index.snapshot().transaction_count(), 1);
    }

    #[test]
    fn test_pending_spend_policies() {
        let funding = funding();
        let spend = tx(
            vec![OutPoint::new(funding.compute_txid(), 0)],
            vec![(script(9), 40_000), (script(2), 9_000)],
        );

        let deduct = UtxoIndex::new(PendingSpendPolicy::Deduct);
        deduct.apply_sync_result(
            scripts(),
            chain(vec![(funding.clone(), Some(100)), (spend.clone(), None)], 101),
        );
        // 30_000 untouched + 9_000 pending change
        assert_eq!(deduct.snapshot().balance(), 39_000);

        let confirmed_only = UtxoIndex::new(PendingSpendPolicy::ConfirmedOnly);
        confirmed_only.apply_sync_result(
            scripts(),
            chain(vec![(funding.clone(), Some(100)), (spend.clone(), None)], 101),
        );
        assert_eq!(confirmed_only.snapshot().balance(), 89_000);
        // spendable never offers the pending-spent output
        assert_eq!(confirmed_only.snapshot().spendable().count(), 2);

        confirmed_only.apply_sync_result(scripts(), chain(vec![(spend, Some(102))], 102));
        assert_eq!(confirmed_only.snapshot().balance(), 39_000);
    }

    #[test]
    fn test_confirmation_never_reverts_without_reorg() {
        let index = UtxoIndex::default();
        index.apply_sync_result(scripts(), chain(vec![(funding(), Some(100))], 101));
        let txid = funding().compute_txid();

        index.apply_sync_result(scripts(), chain(vec![(funding(), None)], 102));
        assert_eq!(index.snapshot().transaction(&txid).unwrap().height, Some(100));

        let reverted = index.apply_reorg(100);
        assert_eq!(reverted, vec![txid]);
        let snapshot = index.snapshot();
        assert_eq!(snapshot.transaction(&txid).unwrap().height, None);
        assert_eq!(snapshot.tip_height(), 99);
        assert!(snapshot.list_unspent().all(|u| !u.is_confirmed()));
    }

    #[test]
    fn test_details_received_sent_fee() {
        let funding = funding();
        let spend = tx(
            vec![OutPoint::new(funding.compute_txid(), 0)],
            vec![(script(9), 40_000), (script(2), 9_000)],
        );
        let index = UtxoIndex::default();
        index.apply_sync_result(
            scripts(),
            chain(vec![(funding.clone(), Some(100)), (spend.clone(), Some(101))], 101),
        );
        let snapshot = index.snapshot();

        let incoming = snapshot.details(&funding.compute_txid(), false).unwrap();
        assert_eq!(incoming.received, 80_000);
        assert_eq!(incoming.sent, 0);
        assert_eq!(incoming.fee, None);
        assert!(incoming.transaction.is_none());

        let outgoing = snapshot.details(&spend.compute_txid(), true).unwrap();
        assert_eq!(outgoing.received, 9_000);
        assert_eq!(outgoing.sent, 50_000);
        assert_eq!(outgoing.fee, Some(1_000));
        assert_eq!(outgoing.height, Some(101));
        assert_eq!(outgoing.timestamp, 1_600_000_101);
        assert_eq!(outgoing.transaction.as_ref(), Some(&spend));
        assert_eq!(snapshot.list_transactions(false).count(), 2);
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let index = UtxoIndex::default();
        let before = index.snapshot();
        index.apply_sync_result(scripts(), chain(vec![(funding(), Some(1))], 1));
        assert_eq!(before.balance(), 0);
        assert_eq!(index.snapshot().balance(), 80_000);
    }

    #[test]
    fn test_used_indices_and_load() {
        let index = UtxoIndex::default();
        index.apply_sync_result(scripts(), chain(vec![(funding(), Some(5))], 6));
        let snapshot = index.snapshot();
        assert_eq!(
            snapshot.used_indices(KeychainKind::External),
            BTreeSet::from([0, 1])
        );
        assert!(snapshot.used_indices(KeychainKind::Internal).is_empty());

        let reloaded = UtxoIndex::load(
            PendingSpendPolicy::Deduct,
            snapshot.tip_height(),
            snapshot.scripts().clone(),
            snapshot.entries().map(|(_, e)| e.clone()),
        );
        assert_eq!(reloaded.snapshot().balance(), snapshot.balance());
    }

    #[test]
    fn test_insert_unconfirmed_deducts_immediately() {
        let funding = funding();
        let index = UtxoIndex::default();
        index.apply_sync_result(scripts(), chain(vec![(funding.clone(), Some(5))], 6));
        let spend = tx(
            vec![OutPoint::new(funding.compute_txid(), 1)],
            vec![(script(9), 29_000)],
        );
        index.insert_unconfirmed(spend);
        assert_eq!(index.snapshot().balance(), 50_000);
    }

    fn spend_of(funding: &Transaction, change: u64) -> Transaction {
        tx(
            vec![OutPoint::new(funding.compute_txid(), 0)],
            vec![(script(9), 1_000), (script(2), change)],
        )
    }

    #[test]
    fn test_replacement_confirmed_evicts_original() {
        let funding = funding();
        let original = spend_of(&funding, 49_000);
        let replacement = spend_of(&funding, 48_000);
        let index = UtxoIndex::default();
        index.apply_sync_result(
            scripts(),
            chain(vec![(funding.clone(), Some(100)), (original.clone(), None)], 100),
        );
        assert_eq!(index.snapshot().balance(), 30_000 + 49_000);

        // the chain source only reports the replacement now, and nothing is queried
        let delta = index.apply_sync_result(
            ScriptMap::new(),
            chain(vec![(replacement.clone(), Some(101))], 101),
        );
        assert_eq!(delta.evicted_transactions, vec![original.compute_txid()]);
        let snapshot = index.snapshot();
        assert!(snapshot.transaction(&original.compute_txid()).is_none());
        assert_eq!(snapshot.balance(), 30_000 + 48_000);
    }

    #[test]
    fn test_unreported_mempool_tx_is_dropped() {
        let funding = funding();
        let spend = spend_of(&funding, 49_000);
        let child = tx(
            vec![OutPoint::new(spend.compute_txid(), 1)],
            vec![(script(3), 48_500)],
        );
        let index = UtxoIndex::default();
        index.apply_sync_result(
            scripts(),
            chain(
                vec![(funding.clone(), Some(100)), (spend.clone(), None), (child.clone(), None)],
                100,
            ),
        );
        assert_eq!(index.snapshot().transaction_count(), 3);

        // every touched script was queried and neither mempool tx came back
        let delta =
            index.apply_sync_result(scripts(), chain(vec![(funding.clone(), Some(100))], 101));
        let mut evicted = delta.evicted_transactions.clone();
        evicted.sort();
        let mut expected = vec![spend.compute_txid(), child.compute_txid()];
        expected.sort();
        assert_eq!(evicted, expected);
        assert_eq!(index.snapshot().balance(), 80_000);
        // the freed funding output shows up as new again
        assert_eq!(delta.new_utxos.len(), 1);

        let again = index.apply_sync_result(scripts(), chain(vec![(funding, Some(100))], 101));
        assert!(again.is_empty());
    }

    #[test]
    fn test_unqueried_mempool_tx_is_kept() {
        let funding = funding();
        let spend = spend_of(&funding, 49_000);
        let index = UtxoIndex::default();
        index.apply_sync_result(
            scripts(),
            chain(vec![(funding.clone(), Some(100)), (spend.clone(), None)], 100),
        );

        // only script 1 was queried; spend touches scripts 0 and 2
        let partial: ScriptMap = scripts()
            .into_iter()
            .filter(|(s, _)| *s == script(1))
            .collect();
        let delta = index.apply_sync_result(partial, chain(vec![(funding, Some(100))], 101));
        assert!(delta.evicted_transactions.is_empty());
        assert!(index.snapshot().transaction(&spend.compute_txid()).is_some());
    }

    #[test]
    fn test_reported_replacement_in_mempool_wins() {
        let funding = funding();
        let original = spend_of(&funding, 49_000);
        let replacement = spend_of(&funding, 47_000);
        let index = UtxoIndex::default();
        index.apply_sync_result(
            scripts(),
            chain(vec![(funding.clone(), Some(100)), (original.clone(), None)], 100),
        );
        let delta = index.apply_sync_result(
            ScriptMap::new(),
            chain(vec![(replacement.clone(), None)], 100),
        );
        assert_eq!(delta.evicted_transactions, vec![original.compute_txid()]);
        assert_eq!(delta.updated_transactions, vec![replacement.compute_txid()]);
        assert_eq!(index.snapshot().balance(), 30_000 + 47_000);
    }

    #[test]
    fn test_restore_puts_back_old_snapshot() {
        let index = UtxoIndex::default();
        let before = index.snapshot();
        index.apply_sync_result(scripts(), chain(vec![(funding(), Some(1))], 1));
        index.restore(before);
        assert_eq!(index.snapshot().balance(), 0);
        assert_eq!(index.snapshot().tip_height(), 0);
    }
}

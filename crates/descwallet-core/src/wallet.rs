//! Wallet management

use crate::derivation::{AddressTracker, KeychainState, RotationPolicy, DEFAULT_GAP_LIMIT};
use crate::descriptor::{DerivedScript, DescriptorPair};
use crate::index::{
    ChainSnapshot, IndexSnapshot, IndexedTx, PendingSpendPolicy, ScriptMap, SyncDelta, UtxoIndex,
};
use crate::signer::{self, SignResult, Signer};
use crate::transaction::{BuildContext, CreateTxResult, TxBuilder};
use crate::types::{KeychainKind, TransactionDetails, Utxo};
use crate::Result;
use bitcoin::psbt::Psbt;
use bitcoin::{Address, Transaction, Txid};
use descwallet_params::NetworkType;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Wallet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    /// Full wallet (can sign)
    Full,
    /// Watch-only (public descriptors only, cannot sign)
    WatchOnly,
}

/// Wallet configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Network the descriptors belong to
    pub network: NetworkType,
    /// How unconfirmed spends affect the balance
    #[serde(default)]
    pub pending_spend_policy: PendingSpendPolicy,
    /// Address rotation
    #[serde(default)]
    pub rotation_policy: RotationPolicy,
    /// Unused addresses watched past the last active one
    #[serde(default = "default_gap_limit")]
    pub gap_limit: u32,
}

fn default_gap_limit() -> u32 {
    DEFAULT_GAP_LIMIT
}

impl WalletConfig {
    /// Defaults for `network`
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            network,
            pending_spend_policy: PendingSpendPolicy::default(),
            rotation_policy: RotationPolicy::default(),
            gap_limit: DEFAULT_GAP_LIMIT,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self::for_network(NetworkType::Testnet)
    }
}

/// Persisted wallet state handed to [`Wallet::restore`]
#[derive(Debug, Clone, Default)]
pub struct WalletState {
    /// Chain tip of the last sync
    pub tip_height: u32,
    /// Indexed transactions
    pub transactions: Vec<IndexedTx>,
    /// Derivation state per keychain
    pub keychains: BTreeMap<KeychainKind, KeychainState>,
}

/// Descriptor wallet
///
/// Owns the descriptors, the UTXO index and the derivation tracker. All
/// methods take `&self`; the index swaps immutable snapshots and the tracker
/// sits behind a short-lived lock, so one wallet can be shared across tasks.
pub struct Wallet {
    config: WalletConfig,
    wallet_type: WalletType,
    descriptors: DescriptorPair,
    index: UtxoIndex,
    tracker: Mutex<AddressTracker>,
}

impl Wallet {
    /// Create from descriptor strings
    pub fn new(config: WalletConfig, external: &str, internal: Option<&str>) -> Result<Self> {
        Self::restore(config, external, internal, WalletState::default())
    }

    /// Create from descriptor strings and persisted state
    pub fn restore(
        config: WalletConfig,
        external: &str,
        internal: Option<&str>,
        state: WalletState,
    ) -> Result<Self> {
        let descriptors = DescriptorPair::parse(config.network, external, internal)?;
        let wallet_type = if descriptors.has_private_key() {
            WalletType::Full
        } else {
            WalletType::WatchOnly
        };
        let tracker = AddressTracker::restore(state.keychains, config.rotation_policy)
            .with_gap_limit(config.gap_limit);

        let mut wallet = Self {
            wallet_type,
            descriptors,
            index: UtxoIndex::new(config.pending_spend_policy),
            tracker: Mutex::new(tracker),
            config,
        };
        let scripts = wallet.lookahead_scripts()?;
        wallet.index = UtxoIndex::load(
            wallet.config.pending_spend_policy,
            state.tip_height,
            scripts,
            state.transactions,
        );
        wallet.refresh_used();

        tracing::info!(
            "Opened {:?} wallet on {} with {} transactions",
            wallet.wallet_type,
            wallet.config.network,
            wallet.index.snapshot().transaction_count()
        );
        Ok(wallet)
    }

    /// Get wallet type
    pub fn wallet_type(&self) -> WalletType {
        self.wallet_type
    }

    /// Check if wallet is watch-only
    pub fn is_watch_only(&self) -> bool {
        self.wallet_type == WalletType::WatchOnly
    }

    /// Wallet network
    pub fn network(&self) -> NetworkType {
        self.config.network
    }

    /// Wallet configuration
    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Wallet descriptors
    pub fn descriptors(&self) -> &DescriptorPair {
        &self.descriptors
    }

    /// Keychains backed by their own descriptor
    pub fn keychains(&self) -> Vec<KeychainKind> {
        if self.descriptors.internal.is_some() {
            KeychainKind::ALL.to_vec()
        } else {
            vec![KeychainKind::External]
        }
    }

    /// Address and script at `index` of `keychain`
    pub fn derive_script(&self, keychain: KeychainKind, index: u32) -> Result<DerivedScript> {
        self.descriptors
            .for_keychain(keychain)
            .derive_script(index, self.config.network)
    }

    /// Exclusive end of the watched index range of `keychain`
    pub fn lookahead_end(&self, keychain: KeychainKind) -> u32 {
        if !self.descriptors.for_keychain(keychain).has_wildcard() {
            return 1;
        }
        self.tracker.lock().lookahead_end(keychain)
    }

    fn lookahead_scripts(&self) -> Result<ScriptMap> {
        let mut scripts = ScriptMap::new();
        for keychain in self.keychains() {
            for index in 0..self.lookahead_end(keychain) {
                let derived = self.derive_script(keychain, index)?;
                scripts.insert(derived.script_pubkey, (keychain, index));
            }
        }
        Ok(scripts)
    }

    fn refresh_used(&self) {
        let snapshot = self.index.snapshot();
        let mut tracker = self.tracker.lock();
        for keychain in self.keychains() {
            tracker.mark_used(keychain, &snapshot.used_indices(keychain));
        }
    }

    /// Reveal the next receive address
    pub fn get_new_address(&self) -> Result<Address> {
        let index = {
            let mut tracker = self.tracker.lock();
            tracker.reveal(KeychainKind::External, &self.descriptors.external)
        };
        let derived = self.derive_script(KeychainKind::External, index)?;
        self.index.track_scripts(self.lookahead_scripts()?);
        tracing::debug!("New address at index {}", index);
        Ok(derived.address)
    }

    /// Current index snapshot
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.index.snapshot()
    }

    /// Balance under the configured pending-spend policy
    pub fn balance(&self) -> u64 {
        self.index.snapshot().balance()
    }

    /// Unspent outputs in outpoint order
    pub fn list_unspent(&self) -> Vec<Utxo> {
        self.index.snapshot().list_unspent().collect()
    }

    /// Transaction summaries in txid order
    pub fn list_transactions(&self, include_raw: bool) -> Vec<TransactionDetails> {
        self.index
            .snapshot()
            .list_transactions(include_raw)
            .collect()
    }

    /// Chain tip of the last applied sync
    pub fn tip_height(&self) -> u32 {
        self.index.snapshot().tip_height()
    }

    /// Derivation state for persistence
    pub fn derivation_state(&self) -> BTreeMap<KeychainKind, KeychainState> {
        self.tracker.lock().states().clone()
    }

    /// Merge a complete sync result
    pub fn apply_sync(&self, scripts: ScriptMap, chain: ChainSnapshot) -> Result<SyncDelta> {
        let delta = self.index.apply_sync_result(scripts, chain);
        self.refresh_used();
        self.index.track_scripts(self.lookahead_scripts()?);
        Ok(delta)
    }

    /// Merge a complete sync result and commit it with `persist`
    ///
    /// When the merge or `persist` fails the index and the derivation state
    /// are put back as they were before the call.
    pub fn apply_sync_then<F>(
        &self,
        scripts: ScriptMap,
        chain: ChainSnapshot,
        persist: F,
    ) -> Result<SyncDelta>
    where
        F: FnOnce(&Wallet) -> Result<()>,
    {
        let index = self.index.snapshot();
        let derivation = self.derivation_state();
        let applied = self
            .apply_sync(scripts, chain)
            .and_then(|delta| persist(self).map(|()| delta));
        if let Err(e) = &applied {
            tracing::warn!("Sync not committed, rolling back: {}", e);
            self.index.restore(index);
            self.tracker.lock().replace_states(derivation);
        }
        applied
    }

    /// Reorg notification: unconfirm everything at or above `from_height`
    pub fn apply_reorg(&self, from_height: u32) -> Vec<Txid> {
        self.index.apply_reorg(from_height)
    }

    /// Record a transaction this wallet broadcast
    pub fn insert_broadcast(&self, tx: Transaction) -> Txid {
        self.index.insert_unconfirmed(tx)
    }

    /// Build an unsigned transaction
    ///
    /// The change index is revealed only when the build succeeds and a change
    /// output was added.
    pub fn create_tx(&self, builder: &TxBuilder) -> Result<CreateTxResult> {
        let snapshot = self.index.snapshot();
        let change_keychain = self.descriptors.change_keychain();
        let change_descriptor = self.descriptors.for_keychain(change_keychain);

        let change_index = self.tracker.lock().peek(change_keychain, change_descriptor);
        let result = builder.build(&BuildContext {
            network: self.config.network,
            descriptors: &self.descriptors,
            snapshot: &snapshot,
            change_index,
        })?;
        if let Some((keychain, index)) = result.change {
            self.tracker.lock().mark_revealed(keychain, index);
            let derived = self.derive_script(keychain, index)?;
            self.index
                .track_scripts(ScriptMap::from([(derived.script_pubkey, (keychain, index))]));
        }
        Ok(result)
    }

    /// Sign wallet-owned inputs
    pub fn sign(&self, psbt: Psbt) -> Result<SignResult> {
        let snapshot = self.index.snapshot();
        Signer::new(&self.descriptors, snapshot.scripts()).sign(psbt)
    }

    /// Finalize a fully signed PSBT into a network transaction
    pub fn finalize(&self, psbt: Psbt) -> Result<Transaction> {
        signer::finalize(psbt)
    }

    /// Descriptors with private keys replaced by public keys
    pub fn public_descriptors(&self) -> Result<(String, Option<String>)> {
        let external = self.descriptors.external.to_public_string()?;
        let internal = self
            .descriptors
            .internal
            .as_ref()
            .map(|d| d.to_public_string())
            .transpose()?;
        Ok((external, internal))
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.config.network)
            .field("wallet_type", &self.wallet_type)
            .field("tip_height", &self.tip_height())
            .finish()
    }
}

//! Wallet data model shared by the index, builder and service layers

use bitcoin::{OutPoint, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which descriptor of the wallet an output belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeychainKind {
    /// Receive addresses
    External,
    /// Change addresses
    Internal,
}

impl KeychainKind {
    /// Both keychains, external first
    pub const ALL: [KeychainKind; 2] = [KeychainKind::External, KeychainKind::Internal];

    /// Lower-case name used in storage
    pub const fn as_str(&self) -> &'static str {
        match self {
            KeychainKind::External => "external",
            KeychainKind::Internal => "internal",
        }
    }

    /// Parse the storage name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "external" => Some(KeychainKind::External),
            "internal" => Some(KeychainKind::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for KeychainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unspent output owned by one of the wallet's descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// Output reference
    pub outpoint: OutPoint,
    /// Script and value
    pub txout: TxOut,
    /// Owning keychain
    pub keychain: KeychainKind,
    /// Derivation index of the owning script
    pub derivation_index: u32,
    /// Height of the creating transaction, `None` while unconfirmed
    pub confirmation_height: Option<u32>,
}

impl Utxo {
    /// Value in satoshis
    pub fn value(&self) -> u64 {
        self.txout.value.to_sat()
    }

    /// Whether the output pays to a change address
    pub fn is_internal(&self) -> bool {
        self.keychain == KeychainKind::Internal
    }

    /// Whether the creating transaction is confirmed
    pub fn is_confirmed(&self) -> bool {
        self.confirmation_height.is_some()
    }
}

/// Per-transaction summary from the wallet's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDetails {
    /// Transaction id
    pub txid: Txid,
    /// Full transaction, only when requested
    pub transaction: Option<Transaction>,
    /// Block time when confirmed, first-seen time otherwise (unix seconds)
    pub timestamp: u64,
    /// Sum of outputs paying to the wallet
    pub received: u64,
    /// Sum of wallet-owned outputs this transaction spends
    pub sent: u64,
    /// Fee, `None` when a spent output is unknown to the wallet
    pub fee: Option<u64>,
    /// Confirmation height, `None` while unconfirmed
    pub height: Option<u32>,
}

impl TransactionDetails {
    /// Whether the transaction is confirmed
    pub fn is_confirmed(&self) -> bool {
        self.height.is_some()
    }

    /// Net effect on the wallet balance
    pub fn net(&self) -> i64 {
        self.received as i64 - self.sent as i64
    }
}

/// Lifecycle of a wallet transaction
///
/// `Built -> PartiallySigned -> Finalized -> Broadcast -> Unconfirmed ->
/// Confirmed`. An unconfirmed transaction whose inputs were spent by another
/// one, or that the server dropped, becomes `Replaced` and leaves the index.
/// `Confirmed -> Unconfirmed` is not a transition; only
/// [`TxLifecycle::can_revert_to`] allows it, for reorg notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxLifecycle {
    /// Unsigned PSBT produced by the builder
    Built,
    /// Some but not all inputs signed
    PartiallySigned,
    /// Every input has a final scriptSig/witness
    Finalized,
    /// Handed to the chain source
    Broadcast,
    /// Seen by sync without a confirmation height
    Unconfirmed,
    /// Seen by sync with a confirmation height
    Confirmed,
    /// Double-spent or dropped before confirming
    Replaced,
}

impl TxLifecycle {
    /// State of an indexed transaction at `height`
    pub fn from_height(height: Option<u32>) -> Self {
        match height {
            Some(_) => TxLifecycle::Confirmed,
            None => TxLifecycle::Unconfirmed,
        }
    }

    /// Whether moving forward from `self` to `next` is allowed
    ///
    /// Staying in the same state is always allowed.
    pub fn can_transition_to(&self, next: TxLifecycle) -> bool {
        use TxLifecycle::*;
        *self == next
            || matches!(
                (self, next),
                (Built, PartiallySigned)
                    | (Built, Finalized)
                    | (PartiallySigned, Finalized)
                    | (Finalized, Broadcast)
                    | (Broadcast, Unconfirmed)
                    | (Broadcast, Confirmed)
                    | (Broadcast, Replaced)
                    | (Unconfirmed, Confirmed)
                    | (Unconfirmed, Replaced)
            )
    }

    /// Whether a reorg notification may move `self` back to `next`
    pub fn can_revert_to(&self, next: TxLifecycle) -> bool {
        matches!((self, next), (TxLifecycle::Confirmed, TxLifecycle::Unconfirmed))
    }
}

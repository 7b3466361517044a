//! Descriptor wallet core
//!
//! This crate implements the wallet engine: mnemonic and extended-key
//! derivation, output descriptors, the UTXO and transaction index, coin
//! selection, transaction building, and PSBT signing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod derivation;
pub mod descriptor;
pub mod error;
pub mod fees;
pub mod index;
pub mod keys;
pub mod selection;
pub mod signer;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use derivation::{AddressTracker, KeychainState, RotationPolicy, DEFAULT_GAP_LIMIT};
pub use descriptor::{checksum, DerivedScript, Descriptor, DescriptorPair, ScriptTemplate};
pub use error::{Error, ErrorCategory, Result};
pub use fees::{FeeCalculator, FeeRate, DEFAULT_FEE_RATE};
pub use index::{
    ChainSnapshot, ChainTx, IndexSnapshot, IndexedTx, PendingSpendPolicy, ScriptMap, SyncDelta,
    UtxoIndex,
};
pub use keys::{ExtendedKeyPair, ExtendedKeys, DEFAULT_WORD_COUNT, VALID_WORD_COUNTS};
pub use selection::{CoinSelector, SelectionStrategy, UtxoSelector};
pub use signer::{finalize, SignResult, Signer};
pub use transaction::{CreateTxResult, Recipient, TxBuilder};
pub use types::{KeychainKind, TransactionDetails, TxLifecycle, Utxo};
pub use wallet::{Wallet, WalletConfig, WalletState, WalletType};

use bitcoin::secp256k1::{All, Secp256k1};
use once_cell::sync::Lazy;

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Shared secp256k1 context
pub(crate) fn secp() -> &'static Secp256k1<All> {
    &SECP
}

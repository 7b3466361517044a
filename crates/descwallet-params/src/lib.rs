//! Bitcoin network parameters and relay policy constants
//!
//! This crate fixes everything that depends on the selected network:
//! extended-key version bytes, BIP-44 coin types, address prefixes and the
//! default Electrum ports, plus the standardness limits the wallet applies
//! when building transactions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod network;
pub mod policy;

pub use network::{ExtendedKeyVersion, Network, NetworkType};
pub use policy::RelayPolicy;

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Extended key version bytes not recognised
    #[error("Unknown extended key version: {0:02x?}")]
    UnknownKeyVersion([u8; 4]),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;

//! Electrum chain-data collaborator
//!
//! Fetches the history of wallet scripts from an Electrum server and turns it
//! into one complete [`descwallet_core::ChainSnapshot`]. Nothing is applied to
//! the wallet here; callers merge the result after the whole scan succeeded.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod progress;
pub mod source;
pub mod sync;

pub use cancel::{CancelReason, CancelToken};
pub use client::{
    parse_endpoint, script_hash, ElectrumClient, ElectrumConfig, Endpoint, RetryConfig,
};
pub use error::{Error, Result};
#[cfg(any(test, feature = "test-helpers"))]
pub use memory::MemoryChainSource;
pub use progress::{SyncProgress, SyncStage};
pub use source::{ChainSource, HistoryEntry};
pub use sync::{SyncConfig, SyncEngine, SyncOutcome};

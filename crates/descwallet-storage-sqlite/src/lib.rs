//! SQLite storage for descriptor wallets
//!
//! Provides a WAL-mode database with versioned migrations holding wallet
//! metadata, indexed transactions, derivation state and the last synced tip.
//! Anything that cannot be decoded is reported as corruption, never a panic.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;
pub mod error;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod store;

pub use database::Database;
pub use error::{Error, Result};
pub use models::*;
pub use repository::Repository;
pub use store::{WalletStore, MAX_BUSY_RETRIES};

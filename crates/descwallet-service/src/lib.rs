//! Wallet service
//!
//! Owns open wallets behind numeric handles and exposes the boundary
//! operations: construction, sync, addresses, balances, transaction
//! building, signing, finalization and broadcast. [`dispatch`] offers the same
//! operations as a single JSON string-in, string-out entry point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod models;
pub mod request;
pub mod service;

pub use config::ServiceConfig;
pub use models::*;
pub use request::{
    dispatch, CreateTransactionParams, Request, MALFORMED_REQUEST_CODE, SERIALIZATION_FAILED_CODE,
};
pub use service::{WalletHandle, WalletService};

//! Error types for the wallet core
//!
//! One taxonomy shared by key derivation, descriptor resolution, the UTXO
//! index, transaction building and the boundary service. Storage and sync
//! crates convert their own errors into this type.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Mnemonic word count outside {12, 15, 18, 21, 24}
    #[error("Invalid word count: {0}")]
    InvalidWordCount(usize),

    /// Mnemonic failed word-list or checksum validation
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Descriptor is malformed or uses an unsupported template
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Not enough spendable value to cover outputs and fee
    #[error("Insufficient funds: needed {needed} sat, available {available} sat")]
    InsufficientFunds {
        /// Value required including fee
        needed: u64,
        /// Value the selectable coins provide
        available: u64,
    },

    /// Wallet owns an input but holds no private key for it
    #[error("Missing private key: {0}")]
    MissingPrivateKey(String),

    /// PSBT input has no final scriptSig or witness
    #[error("Incomplete signatures: {0}")]
    IncompleteSignatures(String),

    /// Another sync is running on the same wallet
    #[error("Sync already in progress for wallet {0}")]
    SyncInProgress(String),

    /// Sync did not complete within the allotted time
    #[error("Sync timed out after {0:?}")]
    SyncTimeout(std::time::Duration),

    /// Sync was cancelled before completion
    #[error("Sync cancelled")]
    SyncCancelled,

    /// Handle unknown or already destroyed
    #[error("Invalid wallet handle: {0}")]
    InvalidHandle(u64),

    /// Chain data endpoint could not be reached
    #[error("Chain source unreachable: {0}")]
    ChainSourceUnreachable(String),

    /// Persisted wallet state cannot be decoded
    #[error("Storage corrupted: {0}")]
    StorageCorrupted(String),

    /// Invalid address format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount overflow
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Fee rate outside relay bounds
    #[error("Invalid fee rate: {0}")]
    InvalidFeeRate(String),

    /// PSBT could not be decoded or is inconsistent
    #[error("Invalid PSBT: {0}")]
    InvalidPsbt(String),

    /// Invalid transaction
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Key material belongs to a different network
    #[error("Network mismatch: {0}")]
    NetworkMismatch(String),

    /// Key derivation error
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Transaction signing error
    #[error("Transaction signing error: {0}")]
    TransactionSigning(String),

    /// Transaction broadcast failed
    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Sync error
    #[error("Sync error: {0}")]
    Sync(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    ///
    /// User errors leave wallet state untouched; the caller may retry with
    /// corrected input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidWordCount(_)
                | Error::InvalidMnemonic(_)
                | Error::InvalidDescriptor(_)
                | Error::InsufficientFunds { .. }
                | Error::InvalidAddress(_)
                | Error::InvalidAmount(_)
                | Error::InvalidFeeRate(_)
                | Error::InvalidPsbt(_)
                | Error::NetworkMismatch(_)
                | Error::MissingPrivateKey(_)
                | Error::IncompleteSignatures(_)
                | Error::SyncInProgress(_)
                | Error::InvalidHandle(_)
        )
    }

    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SyncInProgress(_)
                | Error::SyncTimeout(_)
                | Error::SyncCancelled
                | Error::ChainSourceUnreachable(_)
                | Error::BroadcastFailed(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidWordCount(_) => {
                "Recovery phrases must have 12, 15, 18, 21 or 24 words.".to_string()
            }
            Error::InvalidMnemonic(_) => {
                "The recovery phrase is invalid. Please check and try again.".to_string()
            }
            Error::InsufficientFunds { .. } => {
                "You don't have enough funds for this transaction. Please check your balance and try again.".to_string()
            }
            Error::InvalidAddress(_) => {
                "The recipient address is invalid. Please check and try again.".to_string()
            }
            Error::InvalidAmount(_) => {
                "The amount is invalid. Please enter a valid amount.".to_string()
            }
            Error::SyncInProgress(_) => {
                "The wallet is already syncing. Please wait for it to finish.".to_string()
            }
            Error::SyncTimeout(_) | Error::ChainSourceUnreachable(_) => {
                "Unable to reach the server. Please check your connection and try again.".to_string()
            }
            Error::StorageCorrupted(_) => {
                "The wallet database is damaged and cannot be opened.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InsufficientFunds { .. } | Error::InvalidAmount(_) | Error::AmountOverflow(_) => {
                ErrorCategory::Amount
            }
            Error::InvalidAddress(_) => ErrorCategory::Address,
            Error::InvalidFeeRate(_) => ErrorCategory::Fee,
            Error::InvalidPsbt(_)
            | Error::InvalidTransaction(_)
            | Error::MissingPrivateKey(_)
            | Error::IncompleteSignatures(_)
            | Error::TransactionSigning(_)
            | Error::BroadcastFailed(_) => ErrorCategory::Transaction,
            Error::InvalidWordCount(_)
            | Error::InvalidMnemonic(_)
            | Error::KeyDerivation(_)
            | Error::NetworkMismatch(_) => ErrorCategory::Keys,
            Error::InvalidDescriptor(_) => ErrorCategory::Descriptor,
            Error::ChainSourceUnreachable(_) => ErrorCategory::Network,
            Error::Storage(_) | Error::StorageCorrupted(_) => ErrorCategory::Storage,
            Error::Sync(_) | Error::SyncInProgress(_) | Error::SyncTimeout(_) | Error::SyncCancelled => {
                ErrorCategory::Sync
            }
            Error::InvalidHandle(_) => ErrorCategory::Wallet,
            Error::Io(_) | Error::Serialization(_) | Error::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Stable numeric code reported across the JSON boundary
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidWordCount(_) => 1,
            Error::InvalidMnemonic(_) => 2,
            Error::InvalidDescriptor(_) => 3,
            Error::InsufficientFunds { .. } => 4,
            Error::MissingPrivateKey(_) => 5,
            Error::IncompleteSignatures(_) => 6,
            Error::SyncInProgress(_) => 7,
            Error::SyncTimeout(_) => 8,
            Error::InvalidHandle(_) => 9,
            Error::ChainSourceUnreachable(_) => 10,
            Error::StorageCorrupted(_) => 11,
            Error::SyncCancelled => 12,
            Error::InvalidAddress(_) => 20,
            Error::InvalidAmount(_) | Error::AmountOverflow(_) => 21,
            Error::InvalidFeeRate(_) => 22,
            Error::InvalidPsbt(_) | Error::InvalidTransaction(_) => 23,
            Error::NetworkMismatch(_) => 24,
            Error::KeyDerivation(_) | Error::TransactionSigning(_) => 25,
            Error::BroadcastFailed(_) => 26,
            Error::Storage(_) => 30,
            Error::Sync(_) => 31,
            Error::Io(_) | Error::Serialization(_) | Error::Other(_) => 99,
        }
    }
}

impl From<bitcoin::bip32::Error> for Error {
    fn from(err: bitcoin::bip32::Error) -> Self {
        Error::KeyDerivation(err.to_string())
    }
}

impl From<bitcoin::psbt::Error> for Error {
    fn from(err: bitcoin::psbt::Error) -> Self {
        Error::InvalidPsbt(err.to_string())
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Amount-related errors
    Amount,
    /// Address-related errors
    Address,
    /// Fee-related errors
    Fee,
    /// Transaction-related errors
    Transaction,
    /// Key-related errors
    Keys,
    /// Descriptor-related errors
    Descriptor,
    /// Network-related errors
    Network,
    /// Storage-related errors
    Storage,
    /// Sync-related errors
    Sync,
    /// Wallet-related errors
    Wallet,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Amount => "Amount",
            ErrorCategory::Address => "Address",
            ErrorCategory::Fee => "Fee",
            ErrorCategory::Transaction => "Transaction",
            ErrorCategory::Keys => "Keys",
            ErrorCategory::Descriptor => "Descriptor",
            ErrorCategory::Network => "Network",
            ErrorCategory::Storage => "Storage",
            ErrorCategory::Sync => "Sync",
            ErrorCategory::Wallet => "Wallet",
            ErrorCategory::Internal => "Internal",
        };
        f.write_str(name)
    }
}

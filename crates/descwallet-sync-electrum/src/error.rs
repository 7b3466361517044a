//! Error types for sync operations

use serde_json::Value;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Server could not be reached or the connection dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// Endpoint string is not usable
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Server sent something that is not a valid response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server answered with an error object
    #[error("Server error {code}: {message}")]
    Rpc {
        /// Error code
        code: i64,
        /// Error message
        message: String,
    },

    /// No response within the request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Sync error
    #[error("Sync error: {0}")]
    Sync(String),

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Wallet error while deriving scripts
    #[error(transparent)]
    Wallet(#[from] descwallet_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the connection should be dropped and re-established
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Connection(_) | Error::Protocol(_) | Error::Json(_)
        )
    }
}

/// Error object sent by the server
pub(crate) fn rpc_error(err: Value) -> Error {
    match err {
        Value::Object(ref obj) => Error::Rpc {
            code: obj.get("code").and_then(Value::as_i64).unwrap_or(0),
            message: obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        Value::String(message) => Error::Rpc { code: 0, message },
        other => Error::Rpc {
            code: 0,
            message: other.to_string(),
        },
    }
}

impl From<electrum_client::Error> for Error {
    fn from(e: electrum_client::Error) -> Self {
        use electrum_client::Error as Electrum;
        match e {
            Electrum::Protocol(value) => rpc_error(value),
            Electrum::IOError(e) => Error::Io(e),
            Electrum::JSON(e) => Error::Json(e),
            Electrum::SharedIOError(e) => Error::Connection(e.to_string()),
            Electrum::AllAttemptsErrored(errors) => Error::Connection(format!(
                "all attempts failed, last: {}",
                errors
                    .last()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            )),
            other => Error::Protocol(other.to_string()),
        }
    }
}

impl From<Error> for descwallet_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Connection(_) | Error::Io(_) | Error::Timeout(_) => {
                descwallet_core::Error::ChainSourceUnreachable(err.to_string())
            }
            Error::InvalidEndpoint(msg) => descwallet_core::Error::ChainSourceUnreachable(msg),
            Error::Cancelled => descwallet_core::Error::SyncCancelled,
            Error::Wallet(inner) => inner,
            other => descwallet_core::Error::Sync(other.to_string()),
        }
    }
}

//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data cannot be decoded or belongs to another wallet
    #[error("Corrupted storage: {0}")]
    Corrupted(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Whether the error means the file cannot be trusted
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::Corrupted(_) | Error::Serialization(_) => true,
            Error::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::NotADatabase | rusqlite::ErrorCode::DatabaseCorrupt
            ),
            Error::Database(rusqlite::Error::FromSqlConversionFailure(..))
            | Error::Database(rusqlite::Error::InvalidColumnType(..)) => true,
            _ => false,
        }
    }
}

impl From<Error> for descwallet_core::Error {
    fn from(err: Error) -> Self {
        if err.is_corruption() {
            descwallet_core::Error::StorageCorrupted(err.to_string())
        } else {
            descwallet_core::Error::Storage(err.to_string())
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

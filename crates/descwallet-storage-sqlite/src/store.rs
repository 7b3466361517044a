//! Thread-safe wallet store

use crate::{models::WalletMeta, Database, Error, Repository, Result};
use descwallet_core::{Wallet, WalletConfig};
use parking_lot::Mutex;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Maximum retry attempts for SQLITE_BUSY errors
pub const MAX_BUSY_RETRIES: u32 = 5;
/// Base backoff delay in milliseconds
const BASE_BACKOFF_MS: u64 = 50;
/// Maximum backoff delay in milliseconds
const MAX_BACKOFF_MS: u64 = 1000;

/// One wallet database shared between tasks
#[derive(Debug)]
pub struct WalletStore {
    db: Mutex<Database>,
}

impl WalletStore {
    /// Open or create a wallet database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open(path)?),
        })
    }

    /// In-memory store
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open_in_memory()?),
        })
    }

    /// Open the wallet for these descriptors, restoring any persisted state
    ///
    /// A store created for other descriptors or another network fails with
    /// `StorageCorrupted`.
    pub fn open_wallet(
        &self,
        config: WalletConfig,
        external: &str,
        internal: Option<&str>,
    ) -> descwallet_core::Result<Wallet> {
        let fresh = Wallet::new(config.clone(), external, internal)?;
        let meta = WalletMeta::for_wallet(&fresh)?;

        let existing = self.with_retry(|repo| repo.ensure_meta(&meta))?;
        if !existing {
            self.persist(&fresh)?;
            return Ok(fresh);
        }

        let state = self.with_retry(|repo| repo.load_state())?;
        Wallet::restore(config, external, internal, state)
    }

    /// Write the wallet's index and derivation state
    pub fn persist(&self, wallet: &Wallet) -> Result<()> {
        self.with_retry(|repo| repo.persist_wallet(wallet))
    }

    /// Stored wallet identity
    pub fn meta(&self) -> Result<Option<WalletMeta>> {
        self.with_retry(|repo| repo.load_meta())
    }

    /// Run `f` against the repository, retrying while the file is locked
    pub fn with_retry<F, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(&Repository<'_>) -> Result<T>,
    {
        let mut attempts = 0;

        loop {
            let result = {
                let db = self.db.lock();
                f(&Repository::new(&db))
            };
            match result {
                Ok(value) => return Ok(value),
                Err(Error::Database(ref e)) if is_busy_error(e) && attempts < MAX_BUSY_RETRIES => {
                    attempts += 1;
                    let backoff = calculate_backoff(attempts);
                    tracing::debug!(
                        "SQLITE_BUSY (attempt {}/{}), retrying in {}ms",
                        attempts,
                        MAX_BUSY_RETRIES,
                        backoff
                    );
                    thread::sleep(Duration::from_millis(backoff));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_busy_error(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

fn calculate_backoff(attempt: u32) -> u64 {
    let backoff = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10));
    backoff.min(MAX_BACKOFF_MS)
}

//! Database connection and initialization

use crate::{migrations, Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database at `path` and bring its schema up to date
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // sqlite opens any file lazily; the first read tells whether it is a database
        let readable: std::result::Result<i64, rusqlite::Error> =
            conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0));
        if let Err(e) = readable {
            tracing::warn!("Cannot read {}: {}", path.display(), e);
            return Err(Error::Corrupted(format!(
                "{} is not a readable wallet database: {}",
                path.display(),
                e
            )));
        }

        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // journal_mode returns the resulting mode as a row
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        tracing::debug!("Journal mode: {}", mode);
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin transaction
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.conn.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_database() {
        let file = NamedTempFile::new().unwrap();
        let db = Database::open(file.path()).unwrap();
        let mode: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_non_database_file_is_corruption() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), vec![0x5a; 4096]).unwrap();
        let err = Database::open(file.path()).unwrap_err();
        assert!(err.is_corruption());
        assert!(matches!(
            descwallet_core::Error::from(err),
            descwallet_core::Error::StorageCorrupted(_)
        ));
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let file = NamedTempFile::new().unwrap();
        drop(Database::open(file.path()).unwrap());
        let db = Database::open(file.path()).unwrap();
        let tables: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'transactions'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }
}

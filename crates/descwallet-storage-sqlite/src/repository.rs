//! Data access layer

use crate::{models::*, Database, Error, Result};
use bitcoin::consensus::encode;
use bitcoin::{Transaction, Txid};
use descwallet_core::{IndexedTx, KeychainKind, KeychainState, Wallet, WalletConfig, WalletState};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

/// Repository for database operations
pub struct Repository<'a> {
    db: &'a Database,
}

impl<'a> Repository<'a> {
    /// Create repository
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn conn(&self) -> &Connection {
        self.db.conn()
    }

    /// Insert the wallet identity row
    pub fn insert_meta(&self, meta: &WalletMeta) -> Result<()> {
        let config = serde_json::to_string(&meta.config)?;
        self.conn().execute(
            "INSERT INTO wallet_meta (id, network, external_descriptor, internal_descriptor, config, created_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            params![
                meta.network.to_string(),
                meta.external_descriptor,
                meta.internal_descriptor,
                config,
                meta.created_at,
            ],
        )?;
        tracing::info!("Initialized wallet database for {}", meta.network);
        Ok(())
    }

    /// Load the wallet identity row, if the database was initialized
    pub fn load_meta(&self) -> Result<Option<WalletMeta>> {
        let row = self
            .conn()
            .query_row(
                "SELECT network, external_descriptor, internal_descriptor, config, created_at
                 FROM wallet_meta WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((network, external_descriptor, internal_descriptor, config, created_at)) = row
        else {
            return Ok(None);
        };
        let network = network
            .parse()
            .map_err(|_| Error::Corrupted(format!("unknown network '{}'", network)))?;
        let config: WalletConfig = serde_json::from_str(&config)?;
        Ok(Some(WalletMeta {
            network,
            external_descriptor,
            internal_descriptor,
            config,
            created_at,
        }))
    }

    /// Check that the database belongs to the wallet described by `meta`
    ///
    /// Initializes an empty database. Returns whether a wallet was already stored.
    pub fn ensure_meta(&self, meta: &WalletMeta) -> Result<bool> {
        match self.load_meta()? {
            Some(stored) if stored.same_wallet(meta) => Ok(true),
            Some(stored) => {
                tracing::warn!(
                    "Descriptor mismatch: stored {} on {}",
                    stored.external_descriptor,
                    stored.network
                );
                Err(Error::Corrupted(
                    "database belongs to a different wallet".to_string(),
                ))
            }
            None => {
                self.insert_meta(meta)?;
                Ok(false)
            }
        }
    }

    /// Insert or replace one transaction
    pub fn save_transaction(&self, entry: &IndexedTx) -> Result<()> {
        upsert_transaction(self.conn(), entry)
    }

    /// All stored transactions
    pub fn load_transactions(&self) -> Result<Vec<IndexedTx>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT txid, raw, height, timestamp FROM transactions ORDER BY txid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut transactions = Vec::new();
        for row in rows {
            let (txid, raw, height, timestamp) = row?;
            transactions.push(decode_transaction(&txid, &raw, height, timestamp)?);
        }
        Ok(transactions)
    }

    /// Number of stored transactions
    pub fn transaction_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Insert or replace the state of one keychain
    pub fn save_keychain(&self, keychain: KeychainKind, state: &KeychainState) -> Result<()> {
        upsert_keychain(self.conn(), keychain, state)
    }

    /// Derivation state of all keychains
    pub fn load_keychains(&self) -> Result<BTreeMap<KeychainKind, KeychainState>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT keychain, last_revealed, used FROM keychains")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut keychains = BTreeMap::new();
        for row in rows {
            let (name, last_revealed, used) = row?;
            let keychain = KeychainKind::from_name(&name)
                .ok_or_else(|| Error::Corrupted(format!("unknown keychain '{}'", name)))?;
            let last_revealed = last_revealed.map(to_u32).transpose()?;
            let used: BTreeSet<u32> = serde_json::from_str(&used)?;
            keychains.insert(
                keychain,
                KeychainState {
                    last_revealed,
                    used,
                },
            );
        }
        Ok(keychains)
    }

    /// Store the last synced tip
    pub fn save_tip(&self, tip_height: u32) -> Result<()> {
        upsert_tip(self.conn(), tip_height)
    }

    /// Last synced position
    pub fn load_sync_state(&self) -> Result<SyncState> {
        let row = self
            .conn()
            .query_row(
                "SELECT tip_height, updated_at FROM sync_state WHERE id = 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        match row {
            Some((tip_height, updated_at)) => Ok(SyncState {
                tip_height: to_u32(tip_height)?,
                updated_at,
            }),
            None => Ok(SyncState::default()),
        }
    }

    /// Everything [`Wallet::restore`] needs
    pub fn load_state(&self) -> Result<WalletState> {
        Ok(WalletState {
            tip_height: self.load_sync_state()?.tip_height,
            transactions: self.load_transactions()?,
            keychains: self.load_keychains()?,
        })
    }

    /// Write the full wallet state in one database transaction
    pub fn persist_wallet(&self, wallet: &Wallet) -> Result<()> {
        let snapshot = wallet.snapshot();
        let keychains = wallet.derivation_state();

        let tx = self.conn().unchecked_transaction()?;
        tx.execute("DELETE FROM transactions", [])?;
        for (_, entry) in snapshot.entries() {
            upsert_transaction(&tx, entry)?;
        }
        for (keychain, state) in &keychains {
            upsert_keychain(&tx, *keychain, state)?;
        }
        upsert_tip(&tx, snapshot.tip_height())?;
        tx.commit()?;

        tracing::debug!(
            "Persisted {} transactions at tip {}",
            snapshot.transaction_count(),
            snapshot.tip_height()
        );
        Ok(())
    }
}

fn upsert_transaction(conn: &Connection, entry: &IndexedTx) -> Result<()> {
    let raw = encode::serialize(entry.tx.as_ref());
    conn.execute(
        "INSERT OR REPLACE INTO transactions (txid, raw, height, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.tx.compute_txid().to_string(),
            raw,
            entry.height.map(i64::from),
            to_i64(entry.timestamp)?,
        ],
    )?;
    Ok(())
}

fn upsert_keychain(conn: &Connection, keychain: KeychainKind, state: &KeychainState) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO keychains (keychain, last_revealed, used) VALUES (?1, ?2, ?3)",
        params![
            keychain.as_str(),
            state.last_revealed.map(i64::from),
            serde_json::to_string(&state.used)?,
        ],
    )?;
    Ok(())
}

fn upsert_tip(conn: &Connection, tip_height: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sync_state (id, tip_height, updated_at) VALUES (1, ?1, ?2)",
        params![i64::from(tip_height), chrono::Utc::now().timestamp()],
    )?;
    Ok(())
}

fn decode_transaction(
    txid: &str,
    raw: &[u8],
    height: Option<i64>,
    timestamp: i64,
) -> Result<IndexedTx> {
    let tx: Transaction = encode::deserialize(raw)
        .map_err(|e| Error::Corrupted(format!("transaction {}: {}", txid, e)))?;
    let stored = Txid::from_str(txid)
        .map_err(|e| Error::Corrupted(format!("txid '{}': {}", txid, e)))?;
    if tx.compute_txid() != stored {
        return Err(Error::Corrupted(format!(
            "transaction {} does not match its raw bytes",
            txid
        )));
    }
    Ok(IndexedTx {
        tx: Arc::new(tx),
        height: height.map(to_u32).transpose()?,
        timestamp: u64::try_from(timestamp)
            .map_err(|_| Error::Corrupted(format!("negative timestamp {}", timestamp)))?,
    })
}

fn to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Corrupted(format!("value {} out of range", value)))
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Validation(format!("value {} out of range", value)))
}

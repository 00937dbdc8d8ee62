//! Database persistence layer
//!
//! One SQLite database holds two key/value tables:
//!
//! - the blocks table: `block hash -> encoded block`, plus one row under the
//!   configured tip key (`"l"` by default) holding the current tip hash;
//! - the UTXO index table: `txid -> encoded unspent outputs of that txid`.
//!   It only exists after an index rebuild.
//!
//! Every mutation runs in a single IMMEDIATE transaction, so a block and the
//! tip pointer that names it become visible together or not at all.

use crate::blockchain::{validate_genesis, validate_link, Block, ChainCursor, Sha256Hash};
use crate::config::DatabaseConfig;
use crate::error::{ChainError, Result};
use crate::transaction::TxId;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const MEMORY_PATH: &str = ":memory:";

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> ChainError {
    move |e| ChainError::StoreUnavailable(format!("{}: {}", context, e))
}

pub struct BlockStore {
    conn: Mutex<Connection>,
    config: DatabaseConfig,
}

impl fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStore")
            .field("path", &self.config.path)
            .field("blocks_table", &self.config.blocks_table)
            .field("utxo_table", &self.config.utxo_table)
            .finish()
    }
}

impl BlockStore {
    /// Opens (creating if needed) the database file and the blocks table.
    /// Opening does not initialize a chain; see [`BlockStore::initialize`].
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if config.path != MEMORY_PATH {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ChainError::StoreUnavailable(format!(
                            "Failed to create directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let conn = Connection::open(&config.path).map_err(|e| {
            ChainError::StoreUnavailable(format!(
                "Failed to open database at {}: {}",
                config.path, e
            ))
        })?;

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(db_err("Failed to set busy timeout"))?;

        if config.path != MEMORY_PATH {
            // WAL lets readers proceed while the single writer appends.
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(db_err("Failed to enable WAL"))?;
            debug!("journal_mode = {}", mode);
        }

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            )",
            config.blocks_table
        ))
        .map_err(db_err("Failed to create blocks table"))?;

        Ok(BlockStore {
            conn: Mutex::new(conn),
            config: config.clone(),
        })
    }

    pub fn location(&self) -> &str {
        &self.config.path
    }

    pub fn is_initialized(&self) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(self.read_tip(&conn)?.is_some())
    }

    /// Writes the genesis block and points the tip at it.
    pub fn initialize(&self, genesis: &Block) -> Result<Sha256Hash> {
        validate_genesis(genesis)?;
        let hash = genesis.hash()?;
        let bytes = genesis.to_bytes()?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("Failed to start transaction"))?;

        if self.read_tip(&tx)?.is_some() {
            return Err(ChainError::AlreadyInitialized(self.config.path.clone()));
        }

        self.write_block_and_tip(&tx, &hash, &bytes)?;
        tx.commit().map_err(db_err("Failed to commit genesis block"))?;

        info!("Initialized chain at {} with genesis {}", self.config.path, hex::encode(hash));
        Ok(hash)
    }

    /// Appends `block` on top of the current tip and moves the tip to it.
    pub fn append(&self, block: &Block) -> Result<Sha256Hash> {
        let hash = block.hash()?;
        let bytes = block.to_bytes()?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("Failed to start transaction"))?;

        let tip_hash = self.read_tip(&tx)?.ok_or(ChainError::Uninitialized)?;
        let tip = self.read_block(&tx, &tip_hash)?;
        validate_link(&tip, block)?;

        self.write_block_and_tip(&tx, &hash, &bytes)?;
        tx.commit().map_err(db_err("Failed to commit block"))?;

        debug!("Appended block {} at height {}", hex::encode(hash), block.header.height);
        Ok(hash)
    }

    pub fn get_block(&self, hash: &Sha256Hash) -> Result<Block> {
        let conn = self.conn.lock();
        self.read_block(&conn, hash)
    }

    pub fn get_tip(&self) -> Result<Sha256Hash> {
        let conn = self.conn.lock();
        self.read_tip(&conn)?.ok_or(ChainError::Uninitialized)
    }

    pub fn tip_block(&self) -> Result<Block> {
        let tip = self.get_tip()?;
        self.get_block(&tip)
    }

    /// Lazy tip-to-genesis walk starting from the tip as of now.
    pub fn cursor(&self) -> Result<ChainCursor<'_>> {
        Ok(ChainCursor::new(self, self.get_tip()?))
    }

    pub fn utxo_index_exists(&self) -> Result<bool> {
        let conn = self.conn.lock();
        self.utxo_table_exists(&conn)
    }

    /// Drops the index table and recreates it holding exactly `rows`, which
    /// must have been derived from the chain ending at `scanned_tip`. If the
    /// tip has moved since, nothing is written.
    pub fn replace_utxo_index(
        &self,
        rows: &[(TxId, Vec<u8>)],
        scanned_tip: &Sha256Hash,
    ) -> Result<()> {
        let table = &self.config.utxo_table;
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err("Failed to start transaction"))?;

        let current = self.read_tip(&tx)?;
        if current.as_ref() != Some(scanned_tip) {
            return Err(ChainError::ScanAborted(format!(
                "tip moved from {} to {} while the index was being rebuilt",
                hex::encode(scanned_tip),
                current.map(hex::encode).unwrap_or_else(|| "none".to_string())
            )));
        }

        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                txid BLOB PRIMARY KEY,
                outputs BLOB NOT NULL
             );"
        ))
        .map_err(db_err("Failed to reset utxo index table"))?;

        {
            let mut stmt = tx
                .prepare(&format!("INSERT INTO {} (txid, outputs) VALUES (?1, ?2)", table))
                .map_err(db_err("Failed to prepare utxo insert"))?;
            for (txid, outputs) in rows {
                stmt.execute(params![txid.as_slice(), outputs])
                    .map_err(db_err("Failed to save utxo entry"))?;
            }
        }

        tx.commit().map_err(db_err("Failed to commit utxo index"))?;
        Ok(())
    }

    /// Removes the index table. Reads fall back to chain scans afterwards.
    pub fn drop_utxo_index(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", self.config.utxo_table))
            .map_err(db_err("Failed to drop utxo index table"))?;
        debug!("Dropped utxo index table {}", self.config.utxo_table);
        Ok(())
    }

    /// All index rows in insertion order, or `None` if no index has been built.
    pub fn utxo_index_rows(&self) -> Result<Option<Vec<(TxId, Vec<u8>)>>> {
        let conn = self.conn.lock();
        if !self.utxo_table_exists(&conn)? {
            return Ok(None);
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT txid, outputs FROM {} ORDER BY rowid",
                self.config.utxo_table
            ))
            .map_err(db_err("Failed to prepare utxo query"))?;

        let rows = stmt
            .query_map([], |row| {
                let txid: Vec<u8> = row.get(0)?;
                let outputs: Vec<u8> = row.get(1)?;
                Ok((txid, outputs))
            })
            .map_err(db_err("Failed to query utxo index"))?;

        let mut entries = Vec::new();
        for row in rows {
            let (txid, outputs) = row.map_err(db_err("Failed to read utxo row"))?;
            entries.push((to_hash(txid, "utxo index txid")?, outputs));
        }
        Ok(Some(entries))
    }

    pub fn utxo_index_row(&self, txid: &TxId) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        if !self.utxo_table_exists(&conn)? {
            return Ok(None);
        }
        conn.query_row(
            &format!("SELECT outputs FROM {} WHERE txid = ?1", self.config.utxo_table),
            params![txid.as_slice()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err("Failed to read utxo entry"))
    }

    fn utxo_table_exists(&self, conn: &Connection) -> Result<bool> {
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.config.utxo_table],
                |row| row.get(0),
            )
            .map_err(db_err("Failed to inspect schema"))?;
        Ok(count > 0)
    }

    fn read_tip(&self, conn: &Connection) -> Result<Option<Sha256Hash>> {
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.config.blocks_table),
                params![self.config.tip_key.as_bytes()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Failed to read tip"))?;
        bytes.map(|b| to_hash(b, "tip pointer")).transpose()
    }

    fn read_block(&self, conn: &Connection, hash: &Sha256Hash) -> Result<Block> {
        let bytes: Vec<u8> = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.config.blocks_table),
                params![hash.as_slice()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Failed to read block"))?
            .ok_or_else(|| ChainError::NotFound(format!("block {}", hex::encode(hash))))?;

        let block = Block::from_bytes(&bytes).map_err(|e| {
            ChainError::Serialization(format!("block {}: {}", hex::encode(hash), e))
        })?;

        let actual = block.hash()?;
        if actual != *hash {
            return Err(ChainError::Serialization(format!(
                "block stored under {} hashes to {}",
                hex::encode(hash),
                hex::encode(actual)
            )));
        }
        Ok(block)
    }

    fn write_block_and_tip(&self, conn: &Connection, hash: &Sha256Hash, bytes: &[u8]) -> Result<()> {
        let table = &self.config.blocks_table;
        conn.execute(
            &format!("INSERT INTO {} (key, value) VALUES (?1, ?2)", table),
            params![hash.as_slice(), bytes],
        )
        .map_err(db_err("Failed to save block"))?;
        conn.execute(
            &format!("INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)", table),
            params![self.config.tip_key.as_bytes(), hash.as_slice()],
        )
        .map_err(db_err("Failed to update tip"))?;
        Ok(())
    }
}

fn to_hash(bytes: Vec<u8>, what: &str) -> Result<Sha256Hash> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        ChainError::Serialization(format!("{} must be 32 bytes, got {}", what, len))
    })
}

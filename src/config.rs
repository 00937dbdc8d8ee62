//! Configuration management

use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mining: MiningConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_blocks_table")]
    pub blocks_table: String,
    #[serde(default = "default_utxo_table")]
    pub utxo_table: String,
    /// Key of the tip pointer row inside the blocks table.
    #[serde(default = "default_tip_key")]
    pub tip_key: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiningConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_genesis_reward")]
    pub genesis_reward: u64,
    #[serde(default = "default_max_nonce")]
    pub max_nonce: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanConfig {
    /// Deadline for one full-chain scan; 0 disables it.
    #[serde(default)]
    pub timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            blocks_table: default_blocks_table(),
            utxo_table: default_utxo_table(),
            tip_key: default_tip_key(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            ..Self::default()
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            genesis_reward: default_genesis_reward(),
            max_nonce: default_max_nonce(),
        }
    }
}

impl LedgerConfig {
    /// In-memory store, trivial proof of work. Used by tests and throwaway runs.
    pub fn ephemeral() -> Self {
        Self {
            database: DatabaseConfig::in_memory(),
            mining: MiningConfig {
                difficulty: 0,
                ..MiningConfig::default()
            },
            scan: ScanConfig::default(),
        }
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let config: LedgerConfig =
            toml::from_str(s).map_err(|e| ChainError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|e| {
            ChainError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&config_str)
    }

    /// Like [`LedgerConfig::load`], but an absent file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(ChainError::Config("database.path must be set".to_string()));
        }
        if self.database.tip_key.is_empty() {
            return Err(ChainError::Config("database.tip_key must not be empty".to_string()));
        }
        // Block rows are keyed by 32-byte hashes in the same table.
        if self.database.tip_key.len() == 32 {
            return Err(ChainError::Config(
                "database.tip_key must not be 32 bytes long".to_string(),
            ));
        }
        // Table names are interpolated into SQL.
        for (field, name) in [
            ("database.blocks_table", &self.database.blocks_table),
            ("database.utxo_table", &self.database.utxo_table),
        ] {
            if !is_sql_identifier(name) {
                return Err(ChainError::Config(format!(
                    "{} must be a plain identifier, got {:?}",
                    field, name
                )));
            }
        }
        if self.database.blocks_table == self.database.utxo_table {
            return Err(ChainError::Config(
                "database.blocks_table and database.utxo_table must differ".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_db_path() -> String {
    "./data/ledger.db".to_string()
}

fn default_blocks_table() -> String {
    "blocks".to_string()
}

fn default_utxo_table() -> String {
    "utxoset".to_string()
}

fn default_tip_key() -> String {
    "l".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_difficulty() -> u32 {
    8
}

fn default_genesis_reward() -> u64 {
    10
}

fn default_max_nonce() -> u64 {
    u64::MAX
}

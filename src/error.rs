//! Error types for the ledger

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The backing store could not be opened, read or written.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Store is not initialized; create a chain first")]
    Uninitialized,
    #[error("Store already initialized at {0}")]
    AlreadyInitialized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Coin selection could not cover the requested amount. Nothing was written.
    #[error("Insufficient funds for {address}: requested {requested}, available {available}")]
    InsufficientFunds {
        address: String,
        requested: u64,
        available: u64,
    },
    /// Summing output values exceeded `u64`.
    #[error("Value overflow: {0}")]
    ValueOverflow(String),
    /// Stored bytes failed to decode, or decoded to something inconsistent with their key.
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Chain scan aborted: {0}")]
    ScanAborted(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::StoreUnavailable(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_message() {
        let err = ChainError::InsufficientFunds {
            address: "ab12".to_string(),
            requested: 100,
            available: 6,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds for ab12: requested 100, available 6"
        );
    }

    #[test]
    fn test_bincode_error_maps_to_serialization() {
        let bad: std::result::Result<u64, _> = bincode::deserialize(&[1u8, 2]);
        let err: ChainError = bad.unwrap_err().into();
        assert!(matches!(err, ChainError::Serialization(_)));
    }
}

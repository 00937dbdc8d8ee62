//! Deterministic bincode encoding for everything the ledger persists or hashes.
//!
//! Fixed-size integers, little-endian, trailing bytes rejected. The same
//! value always encodes to the same bytes, which block hashes rely on.

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ChainError, Result};

fn config() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    config()
        .serialize(value)
        .map_err(|e| ChainError::Serialization(format!("encode failed: {}", e)))
}

/// Decode a value, failing on malformed input or trailing bytes.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    config()
        .deserialize(bytes)
        .map_err(|e| ChainError::Serialization(format!("decode failed: {}", e)))
}

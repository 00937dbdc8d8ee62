//! utxoledger - a single-node UTXO ledger on an embedded key/value store
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, the chain cursor and the unspent-output resolver
//! - [`transaction`] - Transaction types, building and validation
//! - [`ledger`] - Façade for balances, coin selection and appends
//!
//! ## Consensus
//! - [`miner`] - Block sealing (proof of work)
//!
//! ## Cryptography
//! - [`crypto`] - Keys, addresses and signatures (secp256k1)
//!
//! ## State Management
//! - [`persistence`] - Database layer (SQLite)
//! - [`utxo_index`] - Persisted unspent-output cache
//! - [`serialization`] - Deterministic binary encoding
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod ledger;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod miner;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;
pub mod serialization;
pub mod utxo_index;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use error::{ChainError, Result};
pub use ledger::Ledger;

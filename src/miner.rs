//! Block sealing
//!
//! The ledger hands a sealer the transactions, parent hash and height of the
//! next block and gets back a finished block. [`ProofOfWork`] is the default
//! sealer: it searches nonces until the header hash falls under the target.

use crate::blockchain::{Block, Sha256Hash};
use crate::config::MiningConfig;
use crate::error::{ChainError, Result};
use crate::transaction::Transaction;
use std::time::Instant;
use tracing::debug;

pub trait BlockSealer: Send + Sync {
    fn seal(
        &self,
        transactions: Vec<Transaction>,
        previous_hash: Sha256Hash,
        height: u64,
    ) -> Result<Block>;
}

#[derive(Debug, Clone)]
pub struct ProofOfWork {
    /// Required leading zero bits of the block hash.
    pub difficulty: u32,
    pub max_nonce: u64,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        ProofOfWork {
            difficulty,
            max_nonce: u64::MAX,
        }
    }

    pub fn from_config(config: &MiningConfig) -> Self {
        ProofOfWork {
            difficulty: config.difficulty,
            max_nonce: config.max_nonce,
        }
    }
}

impl BlockSealer for ProofOfWork {
    fn seal(
        &self,
        transactions: Vec<Transaction>,
        previous_hash: Sha256Hash,
        height: u64,
    ) -> Result<Block> {
        let mut block = Block::new(height, previous_hash, self.difficulty, transactions);
        mine_block(&mut block, self.max_nonce)?;
        Ok(block)
    }
}

/// Increments the nonce from 0 until the block meets its own difficulty target.
pub fn mine_block(block: &mut Block, max_nonce: u64) -> Result<()> {
    let started = Instant::now();
    let target = Block::hash_to_target(block.header.difficulty);

    for nonce in 0..=max_nonce {
        block.header.nonce = nonce;
        if block.hash()? <= target {
            debug!(
                "Sealed block at height {} with nonce {} in {:?}",
                block.header.height,
                nonce,
                started.elapsed()
            );
            return Ok(());
        }
    }

    Err(ChainError::InvalidBlock(format!(
        "No nonce up to {} meets difficulty {} at height {}",
        max_nonce, block.header.difficulty, block.header.height
    )))
}

use crate::error::{ChainError, Result};
use crate::transaction::{OutPoint, Transaction, TxId};
use std::collections::HashMap;

use super::chain::{Block, GENESIS_PREV_HASH};

/// A genesis block sits at height 0 and points at the zero sentinel.
pub fn validate_genesis(block: &Block) -> Result<()> {
    if block.header.height != 0 || block.header.previous_hash != GENESIS_PREV_HASH {
        return Err(ChainError::InvalidBlock(format!(
            "Genesis block must have height 0 and a zero previous hash, got height {} and previous hash {}",
            block.header.height,
            hex::encode(block.header.previous_hash)
        )));
    }
    validate_merkle_root(block)
}

/// `next` must extend `tip` directly.
pub fn validate_link(tip: &Block, next: &Block) -> Result<()> {
    if next.header.height != tip.header.height + 1 {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid block height. Expected {}, but got {}.",
            tip.header.height + 1,
            next.header.height
        )));
    }

    let tip_hash = tip.hash()?;
    if next.header.previous_hash != tip_hash {
        return Err(ChainError::InvalidBlock(format!(
            "Invalid previous block hash. Expected {}, but got {}.",
            hex::encode(tip_hash),
            hex::encode(next.header.previous_hash)
        )));
    }

    validate_merkle_root(next)
}

pub fn validate_merkle_root(block: &Block) -> Result<()> {
    let expected = Block::calculate_merkle_root(&block.transactions);
    if expected != block.header.merkle_root {
        return Err(ChainError::InvalidBlock(format!(
            "Merkle root mismatch. Expected {}, but got {}.",
            hex::encode(expected),
            hex::encode(block.header.merkle_root)
        )));
    }
    Ok(())
}

/// No outpoint may be consumed twice within one batch of transactions.
pub fn validate_no_double_spend(transactions: &[Transaction]) -> Result<()> {
    let mut seen_inputs: HashMap<OutPoint, TxId> = HashMap::new();
    for tx in transactions {
        for input in &tx.inputs {
            let outpoint = input.outpoint();
            if let Some(conflicting) = seen_inputs.get(&outpoint) {
                return Err(ChainError::InvalidTransaction(format!(
                    "Double spend detected. Output {}:{} is spent by both {} and {}",
                    hex::encode(outpoint.txid),
                    outpoint.vout,
                    hex::encode(conflicting),
                    tx.id_hex()
                )));
            }
            seen_inputs.insert(outpoint, tx.id);
        }
    }
    Ok(())
}

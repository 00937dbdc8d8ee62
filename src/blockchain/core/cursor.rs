use crate::error::Result;
use crate::persistence::BlockStore;

use super::chain::{Block, Sha256Hash};

/// Walks the chain from a captured tip back to genesis, one store read per step.
///
/// Yields `Err` at most once: a missing or undecodable block ends the walk.
pub struct ChainCursor<'a> {
    store: &'a BlockStore,
    current: Option<Sha256Hash>,
}

impl<'a> ChainCursor<'a> {
    pub fn new(store: &'a BlockStore, tip: Sha256Hash) -> Self {
        ChainCursor {
            store,
            current: Some(tip),
        }
    }

    /// Hash of the block the next step will read, if any.
    pub fn position(&self) -> Option<Sha256Hash> {
        self.current
    }
}

impl Iterator for ChainCursor<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;
        match self.store.get_block(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current = Some(block.header.previous_hash);
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

use crate::error::Result;
use crate::serialization;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type Sha256Hash = [u8; 32];

/// `previous_hash` of the genesis block.
pub const GENESIS_PREV_HASH: Sha256Hash = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub previous_hash: Sha256Hash,
    pub merkle_root: Sha256Hash,
    pub difficulty: u32,
    pub nonce: u64,
}

impl BlockHeader {
    /// SHA-256 over the deterministic encoding of the header.
    pub fn hash(&self) -> Result<Sha256Hash> {
        let bytes = serialization::serialize(self)?;
        Ok(Sha256::digest(bytes).into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Unsealed block (nonce 0) stamped with the current time.
    pub fn new(
        height: u64,
        previous_hash: Sha256Hash,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        let merkle_root = Block::calculate_merkle_root(&transactions);

        Block {
            header: BlockHeader {
                height,
                timestamp,
                previous_hash,
                merkle_root,
                difficulty,
                nonce: 0,
            },
            transactions,
        }
    }

    pub fn hash(&self) -> Result<Sha256Hash> {
        self.header.hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.previous_hash == GENESIS_PREV_HASH
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Sha256Hash {
        let mut hasher = Sha256::new();
        for tx in transactions {
            hasher.update(tx.id);
        }
        hasher.finalize().into()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialization::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serialization::deserialize(bytes)
    }

    /// Big-endian target: `difficulty` leading zero bits, the rest ones.
    pub fn hash_to_target(difficulty: u32) -> [u8; 32] {
        let mut target = [0xFF; 32];
        let leading_zeros = difficulty.min(256) / 8;
        let partial_bits = difficulty % 8;

        for item in target.iter_mut().take(leading_zeros as usize) {
            *item = 0;
        }

        if leading_zeros < 32 && partial_bits > 0 {
            target[leading_zeros as usize] = 0xFF >> partial_bits;
        }
        target
    }

    pub fn meets_target(&self) -> Result<bool> {
        let target = Block::hash_to_target(self.header.difficulty);
        Ok(self.hash()? <= target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionBuilder;

    fn sample_block() -> Block {
        let coinbase = TransactionBuilder::coinbase([5u8; 32], 10, 0).unwrap();
        Block::new(0, GENESIS_PREV_HASH, 0, vec![coinbase])
    }

    #[test]
    fn test_block_bytes_roundtrip_preserves_hash() {
        let block = sample_block();
        let restored = Block::from_bytes(&block.to_bytes().unwrap()).unwrap();

        assert_eq!(restored.hash().unwrap(), block.hash().unwrap());
        assert_eq!(restored.header.height, block.header.height);
        assert_eq!(restored.header.previous_hash, block.header.previous_hash);
        assert_eq!(restored.transactions, block.transactions);
    }

    #[test]
    fn test_hash_covers_nonce() {
        let mut block = sample_block();
        let before = block.hash().unwrap();
        block.header.nonce += 1;
        assert_ne!(before, block.hash().unwrap());
    }

    #[test]
    fn test_genesis_detection() {
        let mut block = sample_block();
        assert!(block.is_genesis());
        block.header.previous_hash[31] = 1;
        assert!(!block.is_genesis());
    }

    #[test]
    fn test_hash_to_target() {
        assert_eq!(Block::hash_to_target(0), [0xFF; 32]);
        let target = Block::hash_to_target(12);
        assert_eq!(target[0], 0);
        assert_eq!(target[1], 0x0F);
        assert_eq!(target[2], 0xFF);
        assert_eq!(Block::hash_to_target(256), [0u8; 32]);
    }

    #[test]
    fn test_merkle_root_depends_on_order() {
        let a = TransactionBuilder::coinbase([1u8; 32], 1, 0).unwrap();
        let b = TransactionBuilder::coinbase([2u8; 32], 1, 0).unwrap();
        assert_ne!(
            Block::calculate_merkle_root(&[a.clone(), b.clone()]),
            Block::calculate_merkle_root(&[b, a])
        );
    }
}

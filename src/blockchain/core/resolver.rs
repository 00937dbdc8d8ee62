//! Derives the unspent-output set by replaying the whole chain.
//!
//! The walk goes tip to genesis. Every input seen marks `(txid, vout)` as
//! spent; an output is reported only if nothing newer spent it. Since an
//! output can only be spent by a transaction that comes after it, by the time
//! a block's outputs are checked every possible spender has already been
//! recorded. Inside one block, all inputs are recorded before any outputs are
//! checked so spends between transactions of the same block are honoured too.
//!
//! Cost is one full chain read per call; [`crate::utxo_index::UtxoIndex`]
//! caches the global result.

use crate::crypto::Address;
use crate::error::{ChainError, Result};
use crate::persistence::BlockStore;
use crate::transaction::{TxId, Utxo};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::chain::Sha256Hash;
use super::cursor::ChainCursor;

/// Abort hooks for a full-chain scan, checked before each block is read.
#[derive(Debug, Clone, Default)]
pub struct ScanControl {
    cancel: Option<Arc<AtomicBool>>,
    timeout: Option<Duration>,
}

impl ScanControl {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Abort once `flag` is set to `true` by any thread.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Abort a scan that has been running longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn check(&self, started: Instant, blocks_seen: usize) -> Result<()> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(ChainError::ScanAborted(format!(
                    "cancelled after {} blocks",
                    blocks_seen
                )));
            }
        }
        if let Some(timeout) = self.timeout {
            if started.elapsed() > timeout {
                return Err(ChainError::ScanAborted(format!(
                    "timed out after {:?} and {} blocks",
                    timeout, blocks_seen
                )));
            }
        }
        Ok(())
    }
}

pub struct UnspentOutputResolver<'a> {
    store: &'a BlockStore,
    control: ScanControl,
}

impl<'a> UnspentOutputResolver<'a> {
    pub fn new(store: &'a BlockStore) -> Self {
        Self::with_control(store, ScanControl::unbounded())
    }

    pub fn with_control(store: &'a BlockStore, control: ScanControl) -> Self {
        UnspentOutputResolver { store, control }
    }

    /// Unspent outputs, optionally only those locked to `owner`, in walk order
    /// (newest block first, then transaction order, then output index).
    pub fn resolve(&self, owner: Option<&Address>) -> Result<Vec<Utxo>> {
        self.resolve_at(self.store.get_tip()?, owner)
    }

    /// Like [`UnspentOutputResolver::resolve`], for the chain ending at `tip`.
    pub fn resolve_at(&self, tip: Sha256Hash, owner: Option<&Address>) -> Result<Vec<Utxo>> {
        let started = Instant::now();
        let mut spent: HashMap<TxId, HashSet<u32>> = HashMap::new();
        let mut unspent = Vec::new();
        let mut blocks_seen = 0;

        for block in ChainCursor::new(self.store, tip) {
            self.control.check(started, blocks_seen)?;
            let block = block?;
            blocks_seen += 1;

            for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                for input in &tx.inputs {
                    spent.entry(input.txid).or_default().insert(input.vout);
                }
            }

            for tx in &block.transactions {
                let spent_here = spent.get(&tx.id);
                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = index as u32;
                    if owner.is_some_and(|o| !output.is_locked_to(o)) {
                        continue;
                    }
                    if spent_here.is_some_and(|s| s.contains(&index)) {
                        continue;
                    }
                    unspent.push(Utxo {
                        txid: tx.id,
                        index,
                        output: output.clone(),
                    });
                }
            }
        }

        debug!(
            "Resolved {} unspent outputs over {} blocks in {:?}",
            unspent.len(),
            blocks_seen,
            started.elapsed()
        );
        Ok(unspent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Block, GENESIS_PREV_HASH};
    use crate::config::DatabaseConfig;
    use crate::transaction::{Transaction, TransactionBuilder, TxInput, TxOutput};

    const ALICE: Address = [0xA1; 32];
    const BOB: Address = [0xB0; 32];

    // The resolver never checks signatures, so unsigned inputs are enough here.
    fn spend(from: &[(TxId, u32)], outputs: Vec<TxOutput>) -> Transaction {
        let inputs = from
            .iter()
            .map(|(txid, vout)| TxInput {
                txid: *txid,
                vout: *vout,
                public_key: vec![2u8; 33],
                signature: None,
            })
            .collect();
        Transaction::new(inputs, outputs, 0).unwrap()
    }

    struct TestChain {
        store: BlockStore,
        tip: Block,
    }

    impl TestChain {
        fn new(genesis_txs: Vec<Transaction>) -> Self {
            let store = BlockStore::open(&DatabaseConfig::in_memory()).unwrap();
            let tip = Block::new(0, GENESIS_PREV_HASH, 0, genesis_txs);
            store.initialize(&tip).unwrap();
            TestChain { store, tip }
        }

        fn push(&mut self, txs: Vec<Transaction>) {
            let block = Block::new(self.tip.height() + 1, self.tip.hash().unwrap(), 0, txs);
            self.store.append(&block).unwrap();
            self.tip = block;
        }
    }

    #[test]
    fn test_genesis_coinbase_is_unspent() {
        let coinbase = TransactionBuilder::coinbase(ALICE, 10, 0).unwrap();
        let chain = TestChain::new(vec![coinbase.clone()]);

        let utxos = UnspentOutputResolver::new(&chain.store).resolve(Some(&ALICE)).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].txid, coinbase.id);
        assert_eq!(utxos[0].output.value, 10);
        assert!(UnspentOutputResolver::new(&chain.store).resolve(Some(&BOB)).unwrap().is_empty());
    }

    #[test]
    fn test_spent_output_excluded() {
        let coinbase = TransactionBuilder::coinbase(ALICE, 10, 0).unwrap();
        let mut chain = TestChain::new(vec![coinbase.clone()]);
        let transfer = spend(&[(coinbase.id, 0)], vec![TxOutput::new(4, BOB), TxOutput::new(6, ALICE)]);
        chain.push(vec![transfer.clone()]);

        let resolver = UnspentOutputResolver::new(&chain.store);
        let alice = resolver.resolve(Some(&ALICE)).unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!((alice[0].txid, alice[0].index, alice[0].output.value), (transfer.id, 1, 6));

        let bob = resolver.resolve(Some(&BOB)).unwrap();
        assert_eq!((bob[0].txid, bob[0].index), (transfer.id, 0));

        assert_eq!(resolver.resolve(None).unwrap().len(), 2);
    }

    #[test]
    fn test_spend_within_same_block() {
        let coinbase = TransactionBuilder::coinbase(ALICE, 10, 0).unwrap();
        let mut chain = TestChain::new(vec![coinbase.clone()]);
        let first = spend(&[(coinbase.id, 0)], vec![TxOutput::new(10, BOB)]);
        let second = spend(&[(first.id, 0)], vec![TxOutput::new(10, ALICE)]);
        chain.push(vec![first, second.clone()]);

        let all = UnspentOutputResolver::new(&chain.store).resolve(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].txid, second.id);
    }

    #[test]
    fn test_order_is_newest_block_first() {
        let coinbase = TransactionBuilder::coinbase(ALICE, 10, 0).unwrap();
        let mut chain = TestChain::new(vec![coinbase.clone()]);
        let reward = TransactionBuilder::coinbase(ALICE, 3, 1).unwrap();
        chain.push(vec![reward.clone()]);

        let utxos = UnspentOutputResolver::new(&chain.store).resolve(Some(&ALICE)).unwrap();
        let order: Vec<TxId> = utxos.iter().map(|u| u.txid).collect();
        assert_eq!(order, vec![reward.id, coinbase.id]);
    }

    #[test]
    fn test_partial_spend_of_multi_output_tx() {
        let coinbase = Transaction::new(
            vec![],
            vec![TxOutput::new(1, ALICE), TxOutput::new(2, ALICE), TxOutput::new(3, ALICE)],
            0,
        )
        .unwrap();
        let mut chain = TestChain::new(vec![coinbase.clone()]);
        chain.push(vec![spend(&[(coinbase.id, 1)], vec![TxOutput::new(2, BOB)])]);

        let alice = UnspentOutputResolver::new(&chain.store).resolve(Some(&ALICE)).unwrap();
        let indexes: Vec<u32> = alice.iter().map(|u| u.index).collect();
        assert_eq!(indexes, vec![0, 2]);
    }

    #[test]
    fn test_cancelled_scan_aborts() {
        let coinbase = TransactionBuilder::coinbase(ALICE, 10, 0).unwrap();
        let chain = TestChain::new(vec![coinbase]);
        let flag = Arc::new(AtomicBool::new(true));
        let control = ScanControl::unbounded().with_cancel_flag(flag);

        let result = UnspentOutputResolver::with_control(&chain.store, control).resolve(None);
        assert!(matches!(result, Err(ChainError::ScanAborted(_))));
    }

    #[test]
    fn test_expired_deadline_aborts() {
        let coinbase = TransactionBuilder::coinbase(ALICE, 10, 0).unwrap();
        let mut chain = TestChain::new(vec![coinbase]);
        chain.push(vec![TransactionBuilder::coinbase(ALICE, 1, 1).unwrap()]);
        // Reading the tip and the first block already takes longer than zero.
        let control = ScanControl::unbounded().with_timeout(Duration::ZERO);

        let result = UnspentOutputResolver::with_control(&chain.store, control).resolve(None);
        assert!(matches!(result, Err(ChainError::ScanAborted(_))));
    }
}

//! The ledger façade: chain creation, appends, balances and coin selection.
//!
//! Reads go through the UTXO index when one exists and fall back to a full
//! chain scan otherwise. Every append is followed by a full index rebuild.

use crate::blockchain::{
    validate_no_double_spend, Block, ChainCursor, ScanControl, UnspentOutputResolver,
    GENESIS_PREV_HASH,
};
use crate::config::LedgerConfig;
use crate::crypto::{address_to_hex, Address, KeyPair};
use crate::error::{ChainError, Result};
use crate::miner::BlockSealer;
use crate::persistence::BlockStore;
use crate::transaction::{OutPoint, Transaction, TransactionBuilder, TxId, TxOutput, Utxo};
use crate::utxo_index::UtxoIndex;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use crate::transaction::SpendableOutputs;

pub struct Ledger {
    config: LedgerConfig,
    store: Arc<BlockStore>,
    index: UtxoIndex,
    sealer: Box<dyn BlockSealer>,
    cancel: Option<Arc<AtomicBool>>,
    /// Held from spend validation until the index matches the new tip.
    writer: Mutex<()>,
}

impl Ledger {
    /// Creates a new chain whose genesis coinbase pays `mining.genesis_reward`
    /// to `genesis_address`, then builds the index.
    pub fn create(
        config: LedgerConfig,
        genesis_address: Address,
        sealer: Box<dyn BlockSealer>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(BlockStore::open(&config.database)?);
        if store.is_initialized()? {
            return Err(ChainError::AlreadyInitialized(config.database.path.clone()));
        }

        let coinbase =
            TransactionBuilder::coinbase(genesis_address, config.mining.genesis_reward, 0)?;
        let genesis = sealer.seal(vec![coinbase], GENESIS_PREV_HASH, 0)?;
        store.initialize(&genesis)?;

        let ledger = Self::assemble(config, store, sealer);
        ledger.reset_utxo_set()?;
        Ok(ledger)
    }

    /// Opens an existing chain. Fails with `Uninitialized` if there is none.
    pub fn open(config: LedgerConfig, sealer: Box<dyn BlockSealer>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(BlockStore::open(&config.database)?);
        store.get_tip()?;
        Ok(Self::assemble(config, store, sealer))
    }

    fn assemble(config: LedgerConfig, store: Arc<BlockStore>, sealer: Box<dyn BlockSealer>) -> Self {
        let index = UtxoIndex::new(store.clone());
        Ledger {
            config,
            store,
            index,
            sealer,
            cancel: None,
            writer: Mutex::new(()),
        }
    }

    /// Full-chain scans started by this ledger abort once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn scan_control(&self) -> ScanControl {
        let mut control = ScanControl::unbounded();
        if let Some(flag) = &self.cancel {
            control = control.with_cancel_flag(flag.clone());
        }
        if self.config.scan.timeout_secs > 0 {
            control = control.with_timeout(Duration::from_secs(self.config.scan.timeout_secs));
        }
        control
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn index(&self) -> &UtxoIndex {
        &self.index
    }

    pub fn tip(&self) -> Result<Block> {
        self.store.tip_block()
    }

    pub fn cursor(&self) -> Result<ChainCursor<'_>> {
        self.store.cursor()
    }

    /// Unspent outputs straight from the chain, bypassing the index.
    pub fn scan_unspent_outputs(&self, owner: Option<&Address>) -> Result<Vec<Utxo>> {
        UnspentOutputResolver::with_control(&self.store, self.scan_control()).resolve(owner)
    }

    /// Unspent outputs locked to `owner`, from the index if built.
    pub fn unspent_outputs(&self, owner: &Address) -> Result<Vec<Utxo>> {
        match self.index.lookup(owner)? {
            Some(utxos) => Ok(utxos),
            None => self.scan_unspent_outputs(Some(owner)),
        }
    }

    /// Sum of unspent value locked to `owner`; 0 for unknown addresses.
    pub fn get_balance(&self, owner: &Address) -> Result<u64> {
        self.unspent_outputs(owner)?
            .iter()
            .try_fold(0u64, |acc, u| acc.checked_add(u.output.value))
            .ok_or_else(|| overflow(owner))
    }

    /// Greedy first-fit selection in index/scan order, stopping as soon as
    /// the running total covers `amount`. Read-only.
    pub fn find_spendable_utxos(&self, owner: &Address, amount: u64) -> Result<SpendableOutputs> {
        let mut selection = SpendableOutputs::default();
        for utxo in self.unspent_outputs(owner)? {
            if selection.total >= amount {
                break;
            }
            selection.total = selection
                .total
                .checked_add(utxo.output.value)
                .ok_or_else(|| overflow(owner))?;
            selection.outpoints.push(utxo.outpoint());
        }

        if selection.total < amount {
            warn!(
                "Insufficient funds for {}: requested {}, available {}",
                address_to_hex(owner),
                amount,
                selection.total
            );
            return Err(ChainError::InsufficientFunds {
                address: address_to_hex(owner),
                requested: amount,
                available: selection.total,
            });
        }
        Ok(selection)
    }

    /// Seals `transactions` into a block on top of the tip, appends it and
    /// rebuilds the index. Only the genesis block mints value, so every
    /// transaction must spend at least one output.
    pub fn append_transfer(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let _writer = self.writer.lock();

        if transactions.is_empty() {
            return Err(ChainError::InvalidTransaction(
                "Cannot append a block without transactions".to_string(),
            ));
        }
        for tx in &transactions {
            if tx.is_coinbase() {
                return Err(ChainError::InvalidTransaction(format!(
                    "Transaction {} has no inputs; only the genesis block may mint value",
                    tx.id_hex()
                )));
            }
            tx.validate()?;
        }
        self.validate_spends(&transactions)?;
        validate_no_double_spend(&transactions)?;

        let tip = self.store.tip_block()?;
        let block = self
            .sealer
            .seal(transactions, tip.hash()?, tip.height() + 1)?;
        let hash = self.store.append(&block)?;
        info!(
            "Appended block {} at height {} with {} transactions",
            hex::encode(hash),
            block.height(),
            block.transactions.len()
        );

        if let Err(e) = self.index.rebuild(self.scan_control()) {
            // A stale index would serve outputs the new block spent.
            if let Err(drop_err) = self.store.drop_utxo_index() {
                warn!("Failed to drop stale UTXO index: {}", drop_err);
            }
            return Err(e);
        }
        Ok(block)
    }

    /// Every input must consume an unspent output its credential unlocks,
    /// either from the chain or created earlier in the same batch, and a
    /// transaction may not pay out more than it consumes. Ids must be new.
    fn validate_spends(&self, transactions: &[Transaction]) -> Result<()> {
        let scanned: Option<HashMap<OutPoint, Utxo>> = if self.index.exists()? {
            None
        } else {
            Some(
                self.scan_unspent_outputs(None)?
                    .into_iter()
                    .map(|u| (u.outpoint(), u))
                    .collect(),
            )
        };
        let confirmed = |outpoint: &OutPoint| -> Result<Option<TxOutput>> {
            match &scanned {
                Some(map) => Ok(map.get(outpoint).map(|u| u.output.clone())),
                None => Ok(self.index.find(outpoint)?.map(|u| u.output)),
            }
        };
        // A fully spent transaction cannot share an id with a new one: the new
        // one spends an unspent output, and its id commits to that outpoint.
        let has_unspent = |txid: &TxId| -> Result<bool> {
            match &scanned {
                Some(map) => Ok(map.keys().any(|op| op.txid == *txid)),
                None => Ok(self.store.utxo_index_row(txid)?.is_some()),
            }
        };

        let mut batch_ids: HashSet<TxId> = HashSet::new();
        let mut pending: HashMap<OutPoint, TxOutput> = HashMap::new();

        for tx in transactions {
            if !batch_ids.insert(tx.id) || has_unspent(&tx.id)? {
                return Err(ChainError::InvalidTransaction(format!(
                    "Transaction {} already exists",
                    tx.id_hex()
                )));
            }

            let mut input_total: u64 = 0;
            for input in &tx.inputs {
                let outpoint = input.outpoint();
                let output = match pending.remove(&outpoint) {
                    Some(output) => output,
                    None => confirmed(&outpoint)?.ok_or_else(|| {
                        ChainError::InvalidTransaction(format!(
                            "Transaction {} spends {}:{}, which is not an unspent output",
                            tx.id_hex(),
                            hex::encode(input.txid),
                            input.vout
                        ))
                    })?,
                };
                if !input.can_unlock(&output.owner) {
                    return Err(ChainError::InvalidTransaction(format!(
                        "Transaction {} cannot unlock {}:{} owned by {}",
                        tx.id_hex(),
                        hex::encode(input.txid),
                        input.vout,
                        address_to_hex(&output.owner)
                    )));
                }
                input_total = input_total.checked_add(output.value).ok_or_else(|| {
                    ChainError::ValueOverflow(format!("inputs of {}", tx.id_hex()))
                })?;
            }

            if input_total < tx.output_total() {
                return Err(ChainError::InvalidTransaction(format!(
                    "Transaction {} pays out {} but consumes only {}",
                    tx.id_hex(),
                    tx.output_total(),
                    input_total
                )));
            }

            for (vout, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    txid: tx.id,
                    vout: vout as u32,
                };
                pending.insert(outpoint, output.clone());
            }
        }
        Ok(())
    }

    /// Selects coins, builds and signs a transfer from `from` to `to`, and appends it.
    pub fn send(&self, from: &KeyPair, to: Address, amount: u64) -> Result<Block> {
        let spendable = self.find_spendable_utxos(&from.address(), amount)?;
        let tx = TransactionBuilder::transfer(from, to, amount, &spendable)?;
        self.append_transfer(vec![tx])
    }

    /// Rebuilds the UTXO index from scratch. Returns the number of outputs indexed.
    pub fn reset_utxo_set(&self) -> Result<usize> {
        let _writer = self.writer.lock();
        self.index.rebuild(self.scan_control())
    }

    /// Human-readable dump of the chain, tip first. Read-only.
    pub fn print_chain<W: Write>(&self, out: &mut W) -> Result<()> {
        for block in self.cursor()? {
            let block = block?;
            writeln!(out, "Block {}", block.height())?;
            writeln!(out, "  Hash:          {}", hex::encode(block.hash()?))?;
            writeln!(out, "  Previous hash: {}", hex::encode(block.header.previous_hash))?;
            writeln!(out, "  Time:          {}", format_timestamp(block.header.timestamp))?;
            writeln!(out, "  Nonce:         {}", block.header.nonce)?;
            writeln!(out, "  Transactions:")?;
            for tx in &block.transactions {
                writeln!(out, "    {}", tx.id_hex())?;
                for input in &tx.inputs {
                    writeln!(out, "      in   {}:{}", hex::encode(input.txid), input.vout)?;
                }
                for (i, output) in tx.outputs.iter().enumerate() {
                    writeln!(
                        out,
                        "      out  #{} {} -> {}",
                        i,
                        output.value,
                        address_to_hex(&output.owner)
                    )?;
                }
            }
        }
        Ok(())
    }

    /// The chain, tip first, as pretty JSON with hex-encoded hashes.
    pub fn export_chain_json(&self) -> Result<String> {
        let mut blocks = Vec::new();
        for block in self.cursor()? {
            let block = block?;
            let transactions: Vec<_> = block.transactions.iter().map(transaction_json).collect();
            blocks.push(json!({
                "height": block.height(),
                "hash": hex::encode(block.hash()?),
                "previous_hash": hex::encode(block.header.previous_hash),
                "timestamp": block.header.timestamp,
                "difficulty": block.header.difficulty,
                "nonce": block.header.nonce,
                "transactions": transactions,
            }));
        }
        serde_json::to_string_pretty(&blocks)
            .map_err(|e| ChainError::Serialization(format!("chain export failed: {}", e)))
    }
}

fn overflow(owner: &Address) -> ChainError {
    ChainError::ValueOverflow(format!("unspent total of {}", address_to_hex(owner)))
}

fn transaction_json(tx: &Transaction) -> serde_json::Value {
    let inputs: Vec<_> = tx
        .inputs
        .iter()
        .map(|input| {
            json!({
                "txid": hex::encode(input.txid),
                "vout": input.vout,
                "public_key": hex::encode(&input.public_key),
            })
        })
        .collect();
    let outputs: Vec<_> = tx
        .outputs
        .iter()
        .map(|output| {
            json!({
                "value": output.value,
                "owner": address_to_hex(&output.owner),
            })
        })
        .collect();
    json!({
        "id": tx.id_hex(),
        "nonce": tx.nonce,
        "inputs": inputs,
        "outputs": outputs,
    })
}

fn format_timestamp(millis: u64) -> String {
    chrono::DateTime::from_timestamp_millis(millis as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| format!("{} ms", millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::ProofOfWork;
    use crate::transaction::{TxInput, TxOutput};

    fn new_ledger(owner: &KeyPair) -> Ledger {
        Ledger::create(LedgerConfig::ephemeral(), owner.address(), Box::new(ProofOfWork::new(0)))
            .unwrap()
    }

    #[test]
    fn test_genesis_balance() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);
        assert_eq!(ledger.get_balance(&alice.address()).unwrap(), 10);
        assert_eq!(ledger.get_balance(&[0u8; 32]).unwrap(), 0);
        assert!(ledger.index().exists().unwrap());
    }

    #[test]
    fn test_send_moves_value() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let ledger = new_ledger(&alice);

        let block = ledger.send(&alice, bob.address(), 4).unwrap();
        assert_eq!(block.height(), 1);
        assert_eq!(ledger.get_balance(&alice.address()).unwrap(), 6);
        assert_eq!(ledger.get_balance(&bob.address()).unwrap(), 4);
    }

    #[test]
    fn test_insufficient_funds_writes_nothing() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);
        let tip_before = ledger.store().get_tip().unwrap();

        let err = ledger.send(&alice, [1u8; 32], 11).unwrap_err();
        assert_eq!(
            err,
            ChainError::InsufficientFunds {
                address: address_to_hex(&alice.address()),
                requested: 11,
                available: 10,
            }
        );
        assert_eq!(ledger.store().get_tip().unwrap(), tip_before);
        assert_eq!(ledger.get_balance(&alice.address()).unwrap(), 10);
    }

    #[test]
    fn test_selection_stops_once_covered() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);
        // Split the 10 into four outputs owned by alice.
        let spendable = ledger.find_spendable_utxos(&alice.address(), 10).unwrap();
        let mut split = Transaction::new(
            vec![TxInput {
                txid: spendable.outpoints[0].txid,
                vout: spendable.outpoints[0].vout,
                public_key: alice.public_key_bytes().to_vec(),
                signature: None,
            }],
            vec![
                TxOutput::new(1, alice.address()),
                TxOutput::new(2, alice.address()),
                TxOutput::new(3, alice.address()),
                TxOutput::new(4, alice.address()),
            ],
            0,
        )
        .unwrap();
        TransactionBuilder::sign(&mut split, &alice).unwrap();
        ledger.append_transfer(vec![split]).unwrap();

        let selection = ledger.find_spendable_utxos(&alice.address(), 3).unwrap();
        assert_eq!(selection.outpoints.len(), 2);
        assert_eq!(selection.total, 3);
    }

    #[test]
    fn test_double_spend_rejected() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let ledger = new_ledger(&alice);

        let spendable = ledger.find_spendable_utxos(&alice.address(), 10).unwrap();
        let tx = TransactionBuilder::transfer(&alice, bob.address(), 10, &spendable).unwrap();
        ledger.append_transfer(vec![tx.clone()]).unwrap();

        // Same outpoint again, with a different recipient so the id differs.
        let replay = TransactionBuilder::transfer(&alice, [7u8; 32], 10, &spendable).unwrap();
        let err = ledger.append_transfer(vec![replay]).unwrap_err();
        assert!(err.to_string().contains("not an unspent output"));
        assert_eq!(ledger.tip().unwrap().height(), 1);
    }

    #[test]
    fn test_foreign_key_cannot_spend() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let ledger = new_ledger(&alice);

        let spendable = ledger.find_spendable_utxos(&alice.address(), 10).unwrap();
        let theft = TransactionBuilder::transfer(&mallory, mallory.address(), 10, &spendable).unwrap();
        let err = ledger.append_transfer(vec![theft]).unwrap_err();
        assert!(err.to_string().contains("cannot unlock"));
    }

    #[test]
    fn test_overspend_rejected() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);
        let mut spendable = ledger.find_spendable_utxos(&alice.address(), 10).unwrap();
        // Lie about the selected total.
        spendable.total = 50;
        let tx = TransactionBuilder::transfer(&alice, [3u8; 32], 50, &spendable).unwrap();
        let err = ledger.append_transfer(vec![tx]).unwrap_err();
        assert!(err.to_string().contains("consumes only 10"));
    }

    #[test]
    fn test_empty_append_rejected() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);
        assert!(ledger.append_transfer(vec![]).is_err());
    }

    #[test]
    fn test_print_chain_lists_every_block() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);
        ledger.send(&alice, [2u8; 32], 1).unwrap();

        let mut out = Vec::new();
        ledger.print_chain(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Block 1"));
        assert!(text.contains("Block 0"));
        assert!(text.contains(&hex::encode(GENESIS_PREV_HASH)));
    }

    #[test]
    fn test_export_chain_json() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);
        let exported: serde_json::Value =
            serde_json::from_str(&ledger.export_chain_json().unwrap()).unwrap();
        assert_eq!(exported.as_array().unwrap().len(), 1);
        assert_eq!(exported[0]["height"], 0);
        assert_eq!(exported[0]["transactions"][0]["outputs"][0]["value"], 10);
    }

    #[test]
    fn test_cancel_flag_aborts_scans() {
        let alice = KeyPair::generate();
        let flag = Arc::new(AtomicBool::new(false));
        let ledger = new_ledger(&alice).with_cancel_flag(flag.clone());
        flag.store(true, std::sync::atomic::Ordering::Relaxed);

        assert!(matches!(
            ledger.scan_unspent_outputs(None),
            Err(ChainError::ScanAborted(_))
        ));
        // Index reads are not scans.
        assert_eq!(ledger.get_balance(&alice.address()).unwrap(), 10);
    }

    #[test]
    fn test_concurrent_sends_spend_once() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);
        let (bob, carol) = ([0xB0u8; 32], [0xC0u8; 32]);

        let results: Vec<Result<Block>> = std::thread::scope(|s| {
            let handles: Vec<_> = [bob, carol]
                .into_iter()
                .map(|to| {
                    let (ledger, alice) = (&ledger, &alice);
                    s.spawn(move || ledger.send(alice, to, 10))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(ledger.tip().unwrap().height(), 1);
        let indexed = ledger.get_balance(&bob).unwrap() + ledger.get_balance(&carol).unwrap();
        assert_eq!(indexed, 10);
        let scanned: u64 = ledger
            .scan_unspent_outputs(None)
            .unwrap()
            .iter()
            .filter(|u| u.output.owner == bob || u.output.owner == carol)
            .map(|u| u.output.value)
            .sum();
        assert_eq!(scanned, 10);
    }

    #[test]
    fn test_coinbase_append_rejected() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);

        let mint = TransactionBuilder::coinbase(alice.address(), u64::MAX, 1).unwrap();
        let err = ledger.append_transfer(vec![mint]).unwrap_err();
        assert!(err.to_string().contains("no inputs"));

        // Same owner, value and nonce as the genesis reward, hence the same id.
        let copy = TransactionBuilder::coinbase(alice.address(), 10, 0).unwrap();
        assert_eq!(copy.id, ledger.tip().unwrap().transactions[0].id);
        assert!(ledger.append_transfer(vec![copy]).is_err());

        assert_eq!(ledger.tip().unwrap().height(), 0);
        assert_eq!(ledger.get_balance(&alice.address()).unwrap(), 10);
        assert!(ledger.send(&alice, [4u8; 32], 10).is_ok());
    }

    #[test]
    fn test_repeated_txid_in_batch_rejected() {
        let alice = KeyPair::generate();
        let ledger = new_ledger(&alice);
        let spendable = ledger.find_spendable_utxos(&alice.address(), 10).unwrap();
        let tx = TransactionBuilder::transfer(&alice, [5u8; 32], 10, &spendable).unwrap();

        let err = ledger.append_transfer(vec![tx.clone(), tx]).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(ledger.tip().unwrap().height(), 0);
    }

    #[test]
    fn test_chained_spend_within_batch() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let carol = [0xC0u8; 32];
        let ledger = new_ledger(&alice);

        let spendable = ledger.find_spendable_utxos(&alice.address(), 10).unwrap();
        let first = TransactionBuilder::transfer(&alice, bob.address(), 10, &spendable).unwrap();
        let from_first = SpendableOutputs {
            total: 10,
            outpoints: vec![OutPoint {
                txid: first.id,
                vout: 0,
            }],
        };
        let second = TransactionBuilder::transfer(&bob, carol, 10, &from_first).unwrap();

        // The spender has to come after the transaction it spends from.
        let err = ledger
            .append_transfer(vec![second.clone(), first.clone()])
            .unwrap_err();
        assert!(err.to_string().contains("not an unspent output"));

        ledger.append_transfer(vec![first, second]).unwrap();
        assert_eq!(ledger.get_balance(&alice.address()).unwrap(), 0);
        assert_eq!(ledger.get_balance(&bob.address()).unwrap(), 0);
        assert_eq!(ledger.get_balance(&carol).unwrap(), 10);
        assert_eq!(
            ledger.unspent_outputs(&carol).unwrap(),
            ledger.scan_unspent_outputs(Some(&carol)).unwrap()
        );
    }

    #[test]
    fn test_balance_overflow_is_an_error() {
        let alice = KeyPair::generate();
        let mut config = LedgerConfig::ephemeral();
        config.mining.genesis_reward = u64::MAX;
        let ledger =
            Ledger::create(config, alice.address(), Box::new(ProofOfWork::new(0))).unwrap();

        // Written below the ledger, which would refuse a second mint.
        let tip = ledger.tip().unwrap();
        let mint = TransactionBuilder::coinbase(alice.address(), 10, 1).unwrap();
        ledger
            .store()
            .append(&Block::new(1, tip.hash().unwrap(), 0, vec![mint]))
            .unwrap();
        ledger.reset_utxo_set().unwrap();

        assert!(matches!(
            ledger.get_balance(&alice.address()),
            Err(ChainError::ValueOverflow(_))
        ));
        assert!(matches!(
            ledger.find_spendable_utxos(&alice.address(), u64::MAX),
            Err(ChainError::ValueOverflow(_))
        ));
    }
}

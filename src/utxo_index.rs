//! Persisted cache of the global unspent-output set
//!
//! One row per transaction that still has unspent outputs:
//! `txid -> encoded Vec<Utxo>`. The index is always rebuilt wholesale from a
//! full chain scan; the blocks table stays the source of truth and the index
//! can be dropped at any time.

use crate::blockchain::{ScanControl, UnspentOutputResolver};
use crate::crypto::Address;
use crate::error::{ChainError, Result};
use crate::persistence::BlockStore;
use crate::serialization;
use crate::transaction::{OutPoint, TxId, Utxo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone)]
pub struct UtxoIndex {
    store: Arc<BlockStore>,
}

impl UtxoIndex {
    pub fn new(store: Arc<BlockStore>) -> Self {
        UtxoIndex { store }
    }

    pub fn exists(&self) -> Result<bool> {
        self.store.utxo_index_exists()
    }

    /// Drops the index and refills it from a full scan. Returns the number of
    /// unspent outputs indexed.
    pub fn rebuild(&self, control: ScanControl) -> Result<usize> {
        let started = Instant::now();
        let tip = self.store.get_tip()?;
        let unspent =
            UnspentOutputResolver::with_control(&self.store, control).resolve_at(tip, None)?;
        let total = unspent.len();

        // Rows keep the scan's first-seen order so lookups return outputs in
        // the same order a direct scan would.
        let mut position: HashMap<TxId, usize> = HashMap::new();
        let mut grouped: Vec<(TxId, Vec<Utxo>)> = Vec::new();
        for utxo in unspent {
            let slot = *position.entry(utxo.txid).or_insert_with(|| {
                grouped.push((utxo.txid, Vec::new()));
                grouped.len() - 1
            });
            grouped[slot].1.push(utxo);
        }

        let mut rows = Vec::with_capacity(grouped.len());
        for (txid, utxos) in grouped {
            rows.push((txid, serialization::serialize(&utxos)?));
        }

        self.store.replace_utxo_index(&rows, &tip)?;
        info!(
            "Rebuilt UTXO index: {} outputs across {} transactions in {:?}",
            total,
            rows.len(),
            started.elapsed()
        );
        Ok(total)
    }

    /// Unspent outputs locked to `owner`, read from the index only.
    /// `None` when no index has been built.
    pub fn lookup(&self, owner: &Address) -> Result<Option<Vec<Utxo>>> {
        let Some(rows) = self.store.utxo_index_rows()? else {
            return Ok(None);
        };

        let mut found = Vec::new();
        for (txid, bytes) in rows {
            let utxos = decode_row(&txid, &bytes)?;
            found.extend(utxos.into_iter().filter(|u| u.output.is_locked_to(owner)));
        }
        Ok(Some(found))
    }

    /// The indexed entry for one outpoint, if it is unspent.
    pub fn find(&self, outpoint: &OutPoint) -> Result<Option<Utxo>> {
        let Some(bytes) = self.store.utxo_index_row(&outpoint.txid)? else {
            return Ok(None);
        };
        let utxos = decode_row(&outpoint.txid, &bytes)?;
        Ok(utxos.into_iter().find(|u| u.index == outpoint.vout))
    }

    /// Raw rows in table order, for comparing two rebuilds.
    pub fn snapshot(&self) -> Result<Option<Vec<(TxId, Vec<u8>)>>> {
        self.store.utxo_index_rows()
    }
}

fn decode_row(txid: &TxId, bytes: &[u8]) -> Result<Vec<Utxo>> {
    serialization::deserialize(bytes).map_err(|e| {
        ChainError::Serialization(format!(
            "utxo index entry {}: {}",
            hex::encode(txid),
            e
        ))
    })
}

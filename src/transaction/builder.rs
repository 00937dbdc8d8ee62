//! Building and signing transactions
use crate::crypto::{Address, KeyPair};
use crate::error::{ChainError, Result};

use super::types::{SpendableOutputs, Transaction, TxInput, TxOutput};

pub struct TransactionBuilder;

impl TransactionBuilder {
    /// Reward transaction paying `value` to `to`. `nonce` should be the block height.
    pub fn coinbase(to: Address, value: u64, nonce: u64) -> Result<Transaction> {
        Transaction::new(Vec::new(), vec![TxOutput::new(value, to)], nonce)
    }

    /// Spends every outpoint in `spendable`, pays `amount` to `to` and returns
    /// the change to the sender.
    pub fn transfer(
        from: &KeyPair,
        to: Address,
        amount: u64,
        spendable: &SpendableOutputs,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(ChainError::InvalidTransaction(
                "Transfer amount must be greater than zero".to_string(),
            ));
        }
        if spendable.outpoints.is_empty() || spendable.total < amount {
            return Err(ChainError::InvalidTransaction(format!(
                "Selected outputs total {} cannot cover {}",
                spendable.total, amount
            )));
        }

        let public_key = from.public_key_bytes().to_vec();
        let inputs = spendable
            .outpoints
            .iter()
            .map(|op| TxInput {
                txid: op.txid,
                vout: op.vout,
                public_key: public_key.clone(),
                signature: None,
            })
            .collect();

        let mut outputs = vec![TxOutput::new(amount, to)];
        let change = spendable.total - amount;
        if change > 0 {
            outputs.push(TxOutput::new(change, from.address()));
        }

        let mut tx = Transaction::new(inputs, outputs, 0)?;
        Self::sign(&mut tx, from)?;
        Ok(tx)
    }

    /// Signs every input with `key`. The id does not cover signatures, so it stays put.
    pub fn sign(tx: &mut Transaction, key: &KeyPair) -> Result<()> {
        let signature = key.sign(&tx.id)?.to_vec();
        for input in &mut tx.inputs {
            input.signature = Some(signature.clone());
        }
        Ok(())
    }
}

/// Stateless transaction validation
use crate::crypto::verify_signature;
use crate::error::{ChainError, Result};

use super::types::Transaction;

impl Transaction {
    /// Checks that the id matches the contents, that there is something to
    /// pay, and that every input carries a valid signature from its own key.
    /// Spendability of the referenced outputs is checked against chain state
    /// by the ledger, not here.
    pub fn validate(&self) -> Result<()> {
        let expected = self.hash()?;
        if expected != self.id {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction id mismatch: stored {}, computed {}",
                self.id_hex(),
                hex::encode(expected)
            )));
        }

        if self.outputs.is_empty() {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction {} has no outputs",
                self.id_hex()
            )));
        }

        let total = self
            .outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value));
        if total.is_none() {
            return Err(ChainError::InvalidTransaction(format!(
                "Outputs of {} sum past u64::MAX",
                self.id_hex()
            )));
        }

        self.verify_signatures()
    }

    pub fn verify_signatures(&self) -> Result<()> {
        for (i, input) in self.inputs.iter().enumerate() {
            let signature = input.signature.as_ref().ok_or_else(|| {
                ChainError::InvalidTransaction(format!(
                    "Input {} of {} is not signed",
                    i,
                    self.id_hex()
                ))
            })?;
            verify_signature(&input.public_key, &self.id, signature).map_err(|e| {
                ChainError::InvalidTransaction(format!(
                    "Input {} of {}: {}",
                    i,
                    self.id_hex(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

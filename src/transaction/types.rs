/// Transaction types
use crate::blockchain::Sha256Hash;
use crate::crypto::{address_from_public_key, Address};
use crate::error::Result;
use crate::serialization;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type TxId = Sha256Hash;

/// Reference to one output of an earlier transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub txid: TxId,
    pub vout: u32,
    /// Compressed public key of the spender; hashes to the owner address.
    pub public_key: Vec<u8>,
    /// Compact signature over the transaction id. Not part of the id.
    pub signature: Option<Vec<u8>>,
}

impl TxInput {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }

    /// Whether this input's credential authorizes spending for `owner`.
    pub fn can_unlock(&self, owner: &Address) -> bool {
        address_from_public_key(&self.public_key) == *owner
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub owner: Address,
}

impl TxOutput {
    pub fn new(value: u64, owner: Address) -> Self {
        TxOutput { value, owner }
    }

    pub fn is_locked_to(&self, owner: &Address) -> bool {
        self.owner == *owner
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Distinguishes otherwise identical transactions (coinbase uses the block height).
    pub nonce: u64,
}

/// The part of a transaction its id commits to.
#[derive(Serialize)]
struct IdPreimage<'a> {
    inputs: Vec<(&'a TxId, u32, &'a [u8])>,
    outputs: &'a [TxOutput],
    nonce: u64,
}

impl Transaction {
    /// Builds a transaction and derives its id. Signatures are attached afterwards.
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, nonce: u64) -> Result<Self> {
        let mut tx = Transaction {
            id: [0u8; 32],
            inputs,
            outputs,
            nonce,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// A transaction with no inputs mints value and never spends anything.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn hash(&self) -> Result<TxId> {
        let preimage = IdPreimage {
            inputs: self
                .inputs
                .iter()
                .map(|i| (&i.txid, i.vout, i.public_key.as_slice()))
                .collect(),
            outputs: &self.outputs,
            nonce: self.nonce,
        };
        let bytes = serialization::serialize(&preimage)?;
        Ok(Sha256::digest(bytes).into())
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }

    pub fn output_total(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.value))
    }
}

/// One currently-unspent output, as produced by a chain scan or read from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: TxId,
    pub index: u32,
    pub output: TxOutput,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.index,
        }
    }
}

/// Result of coin selection: the chosen outpoints, in selection order, and their total value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpendableOutputs {
    pub total: u64,
    pub outpoints: Vec<OutPoint>,
}

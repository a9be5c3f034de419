use ed25519_dalek::{Signer, SigningKey};
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::collections::HashMap;

use super::chain::{Blockchain, BlockchainError};
use super::crypto::{self, Address, CryptoError, Wallet};

/// Value minted by a coinbase transaction
pub const SUBSIDY: u64 = 100;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Insufficient funds: requested {requested}, accumulated {accumulated}")]
    InsufficientFunds { requested: u64, accumulated: u64 },

    #[error("Previous transaction {0} does not exist")]
    PreviousTransactionNotFound(String),

    #[error("Referenced output {index} of transaction {tx_id} does not exist")]
    ReferencedOutputMissing { tx_id: String, index: i32 },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// A reference to a prior output, together with the material unlocking it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction holding the referenced output
    pub prev_tx_id: Vec<u8>,

    /// Index of the referenced output, -1 for coinbase inputs
    pub out_index: i32,

    /// Signature over the per-input signing digest
    pub signature: Vec<u8>,

    /// Raw public key of the spender (arbitrary data for coinbase inputs)
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Whether this input was created by the owner of `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        crypto::hash_pub_key(&self.pub_key) == pub_key_hash
    }
}

/// An amount of value locked to an owner key hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// The amount held by this output
    pub value: u64,

    /// Digest of the public key allowed to spend this output
    pub pub_key_hash: Vec<u8>,
}

impl TxOutput {
    /// Creates an output of `value` locked to `address`
    pub fn new(value: u64, address: &Address) -> Result<Self, CryptoError> {
        Ok(TxOutput {
            value,
            pub_key_hash: address.pub_key_hash()?,
        })
    }

    /// Whether this output is locked to `pub_key_hash`
    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }
}

/// A transfer of value consuming prior outputs and creating new ones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content digest of the transaction, computed with this field zeroed
    pub id: Vec<u8>,

    pub inputs: Vec<TxInput>,

    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Creates a coinbase transaction minting the subsidy to `to`.
    ///
    /// The input references nothing real; its `pub_key` field carries
    /// arbitrary data instead of a key.
    pub fn coinbase(to: &Address, data: Option<String>) -> Result<Self, TransactionError> {
        let data = data.unwrap_or_else(|| format!("Reward to {}", to));

        let input = TxInput {
            prev_tx_id: Vec::new(),
            out_index: -1,
            signature: Vec::new(),
            pub_key: data.into_bytes(),
        };
        let output = TxOutput::new(SUBSIDY, to)?;

        let mut tx = Transaction {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![output],
        };
        tx.id = tx.hash()?;

        Ok(tx)
    }

    /// Builds a signed payment of `amount` from `wallet` to `to`.
    ///
    /// Spendable outputs are selected greedily in chain-traversal order; a
    /// change output is added only when the selection overshoots.
    pub fn build_payment(
        wallet: &Wallet,
        to: &Address,
        amount: u64,
        chain: &Blockchain,
    ) -> Result<Self, BlockchainError> {
        let pub_key_hash = wallet.pub_key_hash();
        let (accumulated, spendable) = chain.find_spendable_outputs(&pub_key_hash, amount)?;

        if accumulated < amount {
            return Err(TransactionError::InsufficientFunds {
                requested: amount,
                accumulated,
            }
            .into());
        }

        let mut inputs = Vec::new();
        for (prev_tx_id, out_indexes) in &spendable {
            for &out_index in out_indexes {
                inputs.push(TxInput {
                    prev_tx_id: prev_tx_id.clone(),
                    out_index: out_index as i32,
                    signature: Vec::new(),
                    pub_key: wallet.public_key(),
                });
            }
        }

        let mut outputs = vec![TxOutput::new(amount, to).map_err(TransactionError::from)?];
        if accumulated > amount {
            outputs.push(TxOutput {
                value: accumulated - amount,
                pub_key_hash,
            });
        }

        let mut tx = Transaction {
            id: Vec::new(),
            inputs,
            outputs,
        };
        tx.id = tx.hash()?;
        chain.sign_transaction(&mut tx, wallet.signing_key())?;

        Ok(tx)
    }

    /// Content digest over the canonical encoding, with `id` zeroed
    pub fn hash(&self) -> Result<Vec<u8>, TransactionError> {
        let mut tx_copy = self.clone();
        tx_copy.id = Vec::new();

        let encoded = bincode::serialize(&tx_copy)
            .map_err(|e| TransactionError::SerializationError(e.to_string()))?;

        Ok(Sha256::digest(&encoded).to_vec())
    }

    /// Whether this transaction mints value instead of moving it
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_tx_id.is_empty()
            && self.inputs[0].out_index == -1
    }

    /// Copy with all signatures and public keys cleared, used as the base of
    /// the per-input signing digest
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput {
                prev_tx_id: input.prev_tx_id.clone(),
                out_index: input.out_index,
                signature: Vec::new(),
                pub_key: Vec::new(),
            })
            .collect();

        Transaction {
            id: self.id.clone(),
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Signs every input against the transactions it references.
    ///
    /// Each input is signed over the trimmed copy carrying only that input's
    /// referenced locking hash, so a signature commits to exactly one spend.
    pub fn sign(
        &mut self,
        signing_key: &SigningKey,
        prev_txs: &HashMap<Vec<u8>, Transaction>,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();

        for idx in 0..self.inputs.len() {
            let digest = per_input_digest(&mut tx_copy, idx, &self.inputs[idx], prev_txs)?;
            self.inputs[idx].signature = signing_key.sign(&digest).to_bytes().to_vec();
        }

        Ok(())
    }

    /// Checks every input's signature against the referenced locking hash.
    ///
    /// A missing previous transaction is a corruption-class error; a bad
    /// signature is an ordinary `false`.
    pub fn verify(
        &self,
        prev_txs: &HashMap<Vec<u8>, Transaction>,
    ) -> Result<bool, TransactionError> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let mut tx_copy = self.trimmed_copy();

        for (idx, input) in self.inputs.iter().enumerate() {
            let digest = per_input_digest(&mut tx_copy, idx, input, prev_txs)?;

            if !crypto::verify_signature(&digest, &input.signature, &input.pub_key) {
                warn!(
                    "input {} of transaction {} failed signature verification",
                    idx,
                    hex::encode(&self.id)
                );
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Digest a single input is signed over: the trimmed copy with only this
/// input's `pub_key` slot holding the referenced output's locking hash.
fn per_input_digest(
    tx_copy: &mut Transaction,
    idx: usize,
    input: &TxInput,
    prev_txs: &HashMap<Vec<u8>, Transaction>,
) -> Result<Vec<u8>, TransactionError> {
    let prev_tx = prev_txs.get(&input.prev_tx_id).ok_or_else(|| {
        TransactionError::PreviousTransactionNotFound(hex::encode(&input.prev_tx_id))
    })?;

    let prev_output = prev_tx
        .outputs
        .get(input.out_index as usize)
        .ok_or_else(|| TransactionError::ReferencedOutputMissing {
            tx_id: hex::encode(&input.prev_tx_id),
            index: input.out_index,
        })?;

    tx_copy.inputs[idx].signature = Vec::new();
    tx_copy.inputs[idx].pub_key = prev_output.pub_key_hash.clone();
    let digest = tx_copy.hash()?;
    tx_copy.inputs[idx].pub_key = Vec::new();

    Ok(digest)
}

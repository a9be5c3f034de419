use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::pow::ProofOfWork;
use super::transaction::Transaction;

/// Errors that can occur while encoding or decoding blocks
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// A sealed unit of the chain.
///
/// The hash is the proof-of-work digest over `(prev_hash, transactions,
/// nonce)`; an empty `prev_hash` marks the genesis block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Proof-of-work digest of this block
    pub hash: Vec<u8>,

    /// Transactions sealed into this block
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block, empty for genesis
    pub prev_hash: Vec<u8>,

    /// Nonce found by the proof-of-work search
    pub nonce: u64,
}

impl Block {
    /// Seals a new block over `prev_hash`, blocking until the proof-of-work
    /// search succeeds.
    pub fn new(transactions: Vec<Transaction>, prev_hash: Vec<u8>) -> Result<Self, BlockError> {
        let mut block = Block {
            hash: Vec::new(),
            transactions,
            prev_hash,
            nonce: 0,
        };

        let pow = ProofOfWork::new(&block);
        let (nonce, hash) = pow.run()?;

        block.nonce = nonce;
        block.hash = hash;

        Ok(block)
    }

    /// Seals the first block of a chain around its coinbase transaction
    pub fn genesis(coinbase: Transaction) -> Result<Self, BlockError> {
        Block::new(vec![coinbase], Vec::new())
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Canonical digest of the transaction list, the payload part of the
    /// proof-of-work input. Hashing the full encoding (not just the ids)
    /// makes every byte of every transaction tamper-evident.
    pub fn hash_transactions(&self) -> Result<Vec<u8>, BlockError> {
        let encoded = bincode::serialize(&self.transactions)
            .map_err(|e| BlockError::SerializationError(e.to_string()))?;

        Ok(Sha256::digest(&encoded).to_vec())
    }

    /// Encodes the block for persistence
    pub fn serialize(&self) -> Result<Vec<u8>, BlockError> {
        bincode::serialize(self).map_err(|e| BlockError::SerializationError(e.to_string()))
    }

    /// Decodes a persisted block; failure means the store is corrupt
    pub fn deserialize(bytes: &[u8]) -> Result<Self, BlockError> {
        bincode::deserialize(bytes).map_err(|e| BlockError::DeserializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;

    fn coinbase_block() -> Block {
        let wallet = Wallet::new();
        let coinbase = Transaction::coinbase(wallet.address(), None).unwrap();
        Block::genesis(coinbase).unwrap()
    }

    #[test]
    fn test_genesis_block() {
        let block = coinbase_block();

        assert!(block.is_genesis());
        assert!(!block.hash.is_empty());
        assert_eq!(block.transactions.len(), 1);
    }

    #[test]
    fn test_serialization_round_trip() {
        let block = coinbase_block();

        let encoded = block.serialize().unwrap();
        let decoded = Block::deserialize(&encoded).unwrap();

        assert_eq!(decoded, block);
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        let err = Block::deserialize(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(matches!(err, BlockError::DeserializationError(_)));
    }

    #[test]
    fn test_hash_transactions_is_content_sensitive() {
        let mut block = coinbase_block();
        let digest = block.hash_transactions().unwrap();

        assert_eq!(digest, block.hash_transactions().unwrap());

        block.transactions[0].outputs[0].value += 1;
        assert_ne!(digest, block.hash_transactions().unwrap());
    }
}

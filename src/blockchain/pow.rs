use log::debug;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use super::block::{Block, BlockError};

/// Difficulty of the sealing puzzle: a digest is accepted when it is below
/// `2^(256 - DIFFICULTY)`. Kept low so mining terminates promptly.
const DIFFICULTY: u32 = 12;

/// Nonce search over a candidate block.
///
/// The same engine validates sealed blocks independently of mining.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigUint,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block) -> Self {
        let target = BigUint::from(1u8) << (256 - DIFFICULTY as usize);

        ProofOfWork { block, target }
    }

    /// Deterministic digest input for a candidate nonce
    fn prepare_data(&self, nonce: u64) -> Result<Vec<u8>, BlockError> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.block.prev_hash);
        data.extend_from_slice(&self.block.hash_transactions()?);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&(DIFFICULTY as u64).to_be_bytes());

        Ok(data)
    }

    /// Searches nonces from zero until the digest falls below the target.
    /// Blocks the calling thread; there is no attempt bound or timeout.
    pub fn run(&self) -> Result<(u64, Vec<u8>), BlockError> {
        let mut nonce: u64 = 0;

        loop {
            let digest = Sha256::digest(self.prepare_data(nonce)?);

            if BigUint::from_bytes_be(&digest) < self.target {
                debug!("sealed block after {} attempt(s)", nonce + 1);
                return Ok((nonce, digest.to_vec()));
            }

            nonce += 1;
        }
    }

    /// Recomputes the digest from `(prev_hash, transactions, nonce)` and
    /// checks both the threshold and byte equality with the stored hash.
    /// The stored hash field is never trusted on its own.
    pub fn validate(&self) -> Result<bool, BlockError> {
        let digest = Sha256::digest(self.prepare_data(self.block.nonce)?);

        let meets_target = BigUint::from_bytes_be(&digest) < self.target;

        Ok(meets_target && digest.as_slice() == self.block.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::Transaction;

    fn sealed_block() -> Block {
        let wallet = Wallet::new();
        let coinbase = Transaction::coinbase(wallet.address(), None).unwrap();
        Block::genesis(coinbase).unwrap()
    }

    #[test]
    fn test_sealed_block_validates() {
        let block = sealed_block();
        assert!(ProofOfWork::new(&block).validate().unwrap());
    }

    #[test]
    fn test_tampered_prev_hash_invalidates() {
        let mut block = sealed_block();
        block.prev_hash = vec![0x01];
        assert!(!ProofOfWork::new(&block).validate().unwrap());
    }

    #[test]
    fn test_tampered_transaction_invalidates() {
        let mut block = sealed_block();
        block.transactions[0].outputs[0].value += 1;
        assert!(!ProofOfWork::new(&block).validate().unwrap());
    }

    #[test]
    fn test_tampered_nonce_invalidates() {
        let mut block = sealed_block();
        block.nonce += 1;
        assert!(!ProofOfWork::new(&block).validate().unwrap());
    }

    #[test]
    fn test_forged_hash_invalidates() {
        let mut block = sealed_block();
        // A hash below the target but not the digest of the block contents
        block.hash = vec![0u8; 32];
        assert!(!ProofOfWork::new(&block).validate().unwrap());
    }
}

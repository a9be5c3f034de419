use ed25519_dalek::SigningKey;
use log::info;
use thiserror::Error;

use std::collections::HashMap;
use std::sync::Arc;

use super::block::{Block, BlockError};
use super::crypto::{Address, CryptoError};
use super::pow::ProofOfWork;
use super::storage::{BlockStore, StorageError};
use super::transaction::{Transaction, TransactionError};

/// Data recorded in the genesis coinbase input
const GENESIS_DATA: &str = "First Transaction from Genesis";

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Ledger already initialized")]
    AlreadyInitialized,

    #[error("Ledger not initialized")]
    NotInitialized,

    #[error("Transaction {0} failed verification")]
    InvalidTransaction(String),

    #[error("Transaction {0} does not exist")]
    TransactionNotFound(String),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// The ledger aggregate: the current tip plus the block store it names.
///
/// Single-writer by construction; `add_block` is the only mutation.
#[derive(Debug)]
pub struct Blockchain {
    /// Hash of the most recently appended block
    tip: Vec<u8>,

    /// Persistent block store
    store: Arc<BlockStore>,
}

impl Blockchain {
    /// Creates a fresh ledger: seals a genesis block holding a single
    /// coinbase paying the subsidy to `address`.
    pub fn init(store: BlockStore, address: &Address) -> Result<Self, BlockchainError> {
        if store.get_tip()?.is_some() {
            return Err(BlockchainError::AlreadyInitialized);
        }

        let coinbase = Transaction::coinbase(address, Some(GENESIS_DATA.to_string()))?;
        let genesis = Block::genesis(coinbase)?;
        store.put_block(&genesis)?;

        info!("created genesis block {}", hex::encode(&genesis.hash));

        Ok(Blockchain {
            tip: genesis.hash.clone(),
            store: Arc::new(store),
        })
    }

    /// Opens an existing ledger from its store
    pub fn open(store: BlockStore) -> Result<Self, BlockchainError> {
        let tip = store.get_tip()?.ok_or(BlockchainError::NotInitialized)?;

        Ok(Blockchain {
            tip,
            store: Arc::new(store),
        })
    }

    /// Hash of the chain's current head
    pub fn tip(&self) -> &[u8] {
        &self.tip
    }

    /// Verifies, seals, and appends a block of transactions.
    ///
    /// The whole block is rejected on the first transaction that fails
    /// verification; nothing is persisted in that case.
    pub fn add_block(&mut self, transactions: Vec<Transaction>) -> Result<Block, BlockchainError> {
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(BlockchainError::InvalidTransaction(hex::encode(&tx.id)));
            }
        }

        let block = Block::new(transactions, self.tip.clone())?;
        self.store.put_block(&block)?;
        self.tip = block.hash.clone();

        info!(
            "sealed block {} with {} transaction(s)",
            hex::encode(&block.hash),
            block.transactions.len()
        );

        Ok(block)
    }

    /// Tip-to-genesis traversal over the store
    pub fn iterator(&self) -> ChainIterator {
        ChainIterator {
            current_hash: Some(self.tip.clone()),
            store: Arc::clone(&self.store),
        }
    }

    /// All blocks, tip first
    pub fn blocks(&self) -> Result<Vec<Block>, BlockchainError> {
        let mut blocks = Vec::new();
        for block in self.iterator() {
            blocks.push(block?);
        }

        Ok(blocks)
    }

    /// Finds a transaction anywhere in the chain by its id
    pub fn find_transaction(&self, id: &[u8]) -> Result<Transaction, BlockchainError> {
        for block in self.iterator() {
            for tx in block?.transactions {
                if tx.id == id {
                    return Ok(tx);
                }
            }
        }

        Err(BlockchainError::TransactionNotFound(hex::encode(id)))
    }

    /// Resolves every transaction referenced by `tx`'s inputs. A dangling
    /// reference surfaces as `TransactionNotFound` (ledger corruption).
    fn referenced_transactions(
        &self,
        tx: &Transaction,
    ) -> Result<HashMap<Vec<u8>, Transaction>, BlockchainError> {
        let mut prev_txs = HashMap::new();

        for input in &tx.inputs {
            let prev_tx = self.find_transaction(&input.prev_tx_id)?;
            prev_txs.insert(prev_tx.id.clone(), prev_tx);
        }

        Ok(prev_txs)
    }

    /// Signs each input of `tx` against the outputs it references
    pub fn sign_transaction(
        &self,
        tx: &mut Transaction,
        signing_key: &SigningKey,
    ) -> Result<(), BlockchainError> {
        if tx.is_coinbase() {
            return Ok(());
        }

        let prev_txs = self.referenced_transactions(tx)?;
        tx.sign(signing_key, &prev_txs)?;

        Ok(())
    }

    /// Checks each input of `tx` against the outputs it references
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool, BlockchainError> {
        if tx.is_coinbase() {
            return Ok(true);
        }

        let prev_txs = self.referenced_transactions(tx)?;

        Ok(tx.verify(&prev_txs)?)
    }

    /// Re-runs proof-of-work validation and linkage checks over every block
    pub fn validate(&self) -> Result<bool, BlockchainError> {
        let mut expected_hash = self.tip.clone();

        for block in self.iterator() {
            let block = block?;

            if block.hash != expected_hash {
                return Ok(false);
            }
            if !ProofOfWork::new(&block).validate()? {
                return Ok(false);
            }

            expected_hash = block.prev_hash.clone();
        }

        Ok(true)
    }
}

/// Walks the chain strictly backward, ending after the genesis block
pub struct ChainIterator {
    current_hash: Option<Vec<u8>>,
    store: Arc<BlockStore>,
}

impl Iterator for ChainIterator {
    type Item = Result<Block, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;

        match self.store.get_block(&hash) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.prev_hash.clone());
                }
                Some(Ok(block))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;

    fn fresh_chain(wallet: &Wallet) -> Blockchain {
        let store = BlockStore::temporary().unwrap();
        Blockchain::init(store, wallet.address()).unwrap()
    }

    #[test]
    fn test_init_creates_genesis() {
        let wallet = Wallet::new();
        let chain = fresh_chain(&wallet);

        let blocks = chain.blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_genesis());
        assert!(blocks[0].transactions[0].is_coinbase());
        assert_eq!(chain.tip(), blocks[0].hash.as_slice());
    }

    #[test]
    fn test_open_requires_initialization() {
        let store = BlockStore::temporary().unwrap();

        let err = Blockchain::open(store).unwrap_err();
        assert!(matches!(err, BlockchainError::NotInitialized));
    }

    #[test]
    fn test_init_twice_is_rejected() {
        let wallet = Wallet::new();
        let dir = std::env::temp_dir().join(format!("utxo-chain-init-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let chain = Blockchain::init(BlockStore::new(&dir).unwrap(), wallet.address()).unwrap();
        drop(chain);

        let err =
            Blockchain::init(BlockStore::new(&dir).unwrap(), wallet.address()).unwrap_err();
        assert!(matches!(err, BlockchainError::AlreadyInitialized));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_reopen_preserves_tip() {
        let wallet = Wallet::new();
        let dir = std::env::temp_dir().join(format!("utxo-chain-reopen-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let chain = Blockchain::init(BlockStore::new(&dir).unwrap(), wallet.address()).unwrap();
        let tip = chain.tip().to_vec();
        drop(chain);

        let reopened = Blockchain::open(BlockStore::new(&dir).unwrap()).unwrap();
        assert_eq!(reopened.tip(), tip.as_slice());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_iterator_walks_tip_to_genesis() {
        let wallet = Wallet::new();
        let mut chain = fresh_chain(&wallet);

        let genesis_hash = chain.tip().to_vec();
        let added = chain.add_block(Vec::new()).unwrap();

        let blocks = chain.blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].hash, added.hash);
        assert_eq!(blocks[0].prev_hash, genesis_hash);
        assert_eq!(blocks[1].hash, genesis_hash);
        assert!(blocks[1].is_genesis());
    }

    #[test]
    fn test_find_transaction() {
        let wallet = Wallet::new();
        let chain = fresh_chain(&wallet);

        let genesis = chain.blocks().unwrap().pop().unwrap();
        let coinbase = &genesis.transactions[0];

        let found = chain.find_transaction(&coinbase.id).unwrap();
        assert_eq!(found, *coinbase);

        let err = chain.find_transaction(&[0u8; 32]).unwrap_err();
        assert!(matches!(err, BlockchainError::TransactionNotFound(_)));
    }

    #[test]
    fn test_whole_chain_validates() {
        let wallet = Wallet::new();
        let mut chain = fresh_chain(&wallet);
        chain.add_block(Vec::new()).unwrap();

        assert!(chain.validate().unwrap());
    }
}

use std::path::Path;

use sled::transaction::TransactionError;
use sled::{Db, Tree};
use thiserror::Error;

use super::block::{Block, BlockError};

/// Reserved key holding the hash of the chain tip
const TIP_KEY: &[u8] = b"lh";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Storage transaction aborted")]
    TransactionAborted,

    #[error("Block codec error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Block not found: {0}")]
    NotFound(String),
}

/// Persistent block store: serialized blocks keyed by their hash plus the
/// reserved tip pointer, all in one sled tree so the block write and the tip
/// advance commit together.
pub struct BlockStore {
    /// The database instance
    db: Db,

    /// Tree for blocks and the tip pointer
    blocks: Tree,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore").finish()
    }
}

impl BlockStore {
    /// Opens (or creates) a store at the given directory
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let blocks = db.open_tree("blocks")?;

        Ok(Self { db, blocks })
    }

    /// An ephemeral store, removed when dropped. Used for throwaway chains
    /// and tests.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        let blocks = db.open_tree("blocks")?;

        Ok(Self { db, blocks })
    }

    /// Persists `block` under its hash and advances the tip to it, as one
    /// atomic unit: a reader can never observe one without the other.
    pub fn put_block(&self, block: &Block) -> Result<(), StorageError> {
        let encoded = block.serialize()?;

        self.blocks
            .transaction(|tx| {
                tx.insert(block.hash.as_slice(), encoded.as_slice())?;
                tx.insert(TIP_KEY, block.hash.as_slice())?;
                Ok(())
            })
            .map_err(|err: TransactionError<()>| match err {
                TransactionError::Storage(err) => StorageError::DatabaseError(err),
                TransactionError::Abort(()) => StorageError::TransactionAborted,
            })?;

        self.db.flush()?;

        Ok(())
    }

    /// Looks up a block by its hash. Absence is a corruption-class failure:
    /// the chain is presumed internally consistent.
    pub fn get_block(&self, hash: &[u8]) -> Result<Block, StorageError> {
        match self.blocks.get(hash)? {
            Some(value) => Ok(Block::deserialize(&value)?),
            None => Err(StorageError::NotFound(hex::encode(hash))),
        }
    }

    /// Current tip hash, `None` before the genesis block is written
    pub fn get_tip(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blocks.get(TIP_KEY)?.map(|value| value.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::transaction::Transaction;

    fn sealed_block(prev_hash: Vec<u8>) -> Block {
        let wallet = Wallet::new();
        let coinbase = Transaction::coinbase(wallet.address(), None).unwrap();
        Block::new(vec![coinbase], prev_hash).unwrap()
    }

    #[test]
    fn test_put_and_get_block() {
        let store = BlockStore::temporary().unwrap();
        let block = sealed_block(Vec::new());

        store.put_block(&block).unwrap();

        let loaded = store.get_block(&block.hash).unwrap();
        assert_eq!(loaded, block);
    }

    #[test]
    fn test_tip_tracks_latest_block() {
        let store = BlockStore::temporary().unwrap();
        assert!(store.get_tip().unwrap().is_none());

        let first = sealed_block(Vec::new());
        store.put_block(&first).unwrap();
        assert_eq!(store.get_tip().unwrap().unwrap(), first.hash);

        let second = sealed_block(first.hash.clone());
        store.put_block(&second).unwrap();
        assert_eq!(store.get_tip().unwrap().unwrap(), second.hash);
    }

    #[test]
    fn test_unknown_hash_is_not_found() {
        let store = BlockStore::temporary().unwrap();

        let err = store.get_block(&[0u8; 32]).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}

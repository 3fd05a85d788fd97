// Block store using a sled tree

use crate::core::{Block, Hash256, Serializable};
use crate::error::{ChainError, Result};
use sled::{Batch, Tree};

/// Tip key: hash of the best block
const TOP_KEY: &[u8] = b"top";

/// Blocks keyed by hash, plus the tip marker
pub struct BlockchainDB {
    tree: Tree,
}

impl BlockchainDB {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Store a block, moving the tip to it in the same batch when `advance_tip` is set
    pub fn store_block(&self, block: &Block, advance_tip: bool) -> Result<Hash256> {
        let hash = block.hash();

        let mut batch = Batch::default();
        batch.insert(hash.as_bytes().as_slice(), block.serialize());
        if advance_tip {
            batch.insert(TOP_KEY, hash.as_bytes().as_slice());
        }
        self.tree.apply_batch(batch)?;

        Ok(hash)
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        match self.tree.get(hash.as_bytes())? {
            Some(data) => Ok(Some(Block::deserialize(&data).map_err(ChainError::Decode)?)),
            None => Ok(None),
        }
    }

    pub fn get_tip(&self) -> Result<Option<Hash256>> {
        match self.tree.get(TOP_KEY)? {
            Some(data) => Ok(Some(Hash256::from_slice(&data).map_err(ChainError::Decode)?)),
            None => Ok(None),
        }
    }

    /// Delete `hashes` and point the tip at `tip`, atomically
    pub fn truncate(&self, hashes: &[Hash256], tip: &Hash256) -> Result<()> {
        let mut batch = Batch::default();
        for hash in hashes {
            batch.remove(hash.as_bytes().as_slice());
        }
        batch.insert(TOP_KEY, tip.as_bytes().as_slice());
        self.tree.apply_batch(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> BlockchainDB {
        let db = sled::Config::new().temporary(true).open().unwrap();
        BlockchainDB::new(db.open_tree("chain").unwrap())
    }

    #[test]
    fn test_store_and_get_block() {
        let db = db();
        let block = Block::genesis();

        let hash = db.store_block(&block, false).unwrap();
        assert_eq!(db.get_block(&hash).unwrap(), Some(block));
        assert_eq!(db.get_tip().unwrap(), None);
    }

    #[test]
    fn test_store_advances_tip() {
        let db = db();
        let block = Block::genesis();

        let hash = db.store_block(&block, true).unwrap();
        assert_eq!(db.get_tip().unwrap(), Some(hash));
        assert!(db.get_block(&hash).unwrap().is_some());
    }

    #[test]
    fn test_truncate() {
        let db = db();
        let genesis = Block::genesis();
        let genesis_hash = db.store_block(&genesis, true).unwrap();

        let next = Block::new_template(&[1; 20], genesis_hash, 2, vec![], 1);
        let next_hash = db.store_block(&next, true).unwrap();

        db.truncate(&[next_hash], &genesis_hash).unwrap();
        assert_eq!(db.get_block(&next_hash).unwrap(), None);
        assert_eq!(db.get_tip().unwrap(), Some(genesis_hash));
    }

    #[test]
    fn test_missing_block() {
        let db = db();
        assert_eq!(db.get_block(&Hash256::new([3; 32])).unwrap(), None);
    }
}

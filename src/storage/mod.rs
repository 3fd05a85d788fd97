// Storage layer for blocks and the UTXO index

mod blockchain_db;
mod utxo_set;
mod chain;

pub use blockchain_db::BlockchainDB;
pub use utxo_set::{UtxoSet, UtxoEntry, UtxoSnapshot};
pub use chain::{Blockchain, ChainIter};

use crate::error::Result;
use std::path::Path;

/// Storage manager - one sled database holding the chain and UTXO trees
pub struct Storage {
    pub blockchain: BlockchainDB,
    pub utxo_set: UtxoSet,
    db: sled::Db,
}

impl Storage {
    /// Open (or create) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Create a temporary storage (for testing)
    pub fn memory() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            blockchain: BlockchainDB::new(db.open_tree("chain")?),
            utxo_set: UtxoSet::new(db.open_tree("utxo")?),
            db,
        })
    }

    /// Flush both trees to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

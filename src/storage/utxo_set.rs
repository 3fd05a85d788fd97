// UTXO (Unspent Transaction Output) index

use crate::core::{
    Hash256, Transaction, TxOutput, Serializable,
    write_varint, read_varint, read_u32, write_hash, read_hash,
};
use crate::error::{ChainError, Result};
use sled::{Batch, Tree};
use std::collections::HashMap;
use std::io::{Cursor, Write};

/// Checkpoint key: hash of the last block folded into the index
const TOP_KEY: &[u8] = b"top";

/// In-memory view of the index: txid -> still-unspent outputs, ordered by index
pub type UtxoSnapshot = HashMap<Hash256, Vec<UtxoEntry>>;

/// An unspent output together with its position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoEntry {
    pub output: TxOutput,
    /// Output index within the owning transaction
    pub index: u32,
    /// Owning transaction id
    pub txid: Hash256,
}

impl UtxoEntry {
    pub fn new(output: TxOutput, index: u32, txid: Hash256) -> Self {
        Self { output, index, txid }
    }

    /// One entry per output of `tx`
    pub fn from_transaction(tx: &Transaction) -> Vec<Self> {
        let txid = tx.txid();
        tx.outputs
            .iter()
            .enumerate()
            .map(|(index, output)| Self::new(output.clone(), index as u32, txid))
            .collect()
    }
}

/// Stored value format: varint count ‖ (txid ‖ index ‖ output)*
struct EntryList(Vec<UtxoEntry>);

impl Serializable for EntryList {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = write_varint(&mut buf, self.0.len() as u64);
        for entry in &self.0 {
            let _ = write_hash(&mut buf, &entry.txid);
            let _ = buf.write_all(&entry.index.to_le_bytes());
            buf.extend_from_slice(&entry.output.serialize());
        }
        buf
    }

    fn deserialize(data: &[u8]) -> std::result::Result<Self, String> {
        let mut cursor = Cursor::new(data);
        let count = read_varint(&mut cursor).map_err(|e| e.to_string())?;
        let mut entries = Vec::new();
        for _ in 0..count {
            let txid = read_hash(&mut cursor).map_err(|e| e.to_string())?;
            let index = read_u32(&mut cursor).map_err(|e| e.to_string())?;
            let output = TxOutput::deserialize(&mut cursor)?;
            entries.push(UtxoEntry::new(output, index, txid));
        }
        Ok(Self(entries))
    }
}

/// UTXO index stored in its own sled tree
pub struct UtxoSet {
    tree: Tree,
}

impl UtxoSet {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Last block hash folded into the index, if any
    pub fn checkpoint(&self) -> Result<Option<Hash256>> {
        match self.tree.get(TOP_KEY)? {
            Some(data) => Ok(Some(Hash256::from_slice(&data).map_err(ChainError::Decode)?)),
            None => Ok(None),
        }
    }

    /// Forget the checkpoint so the next reindex rebuilds from scratch
    pub fn clear_checkpoint(&self) -> Result<()> {
        self.tree.remove(TOP_KEY)?;
        Ok(())
    }

    /// Unspent outputs of one transaction (empty if none are left)
    pub fn get(&self, txid: &Hash256) -> Result<Vec<UtxoEntry>> {
        match self.tree.get(txid.as_bytes())? {
            Some(data) => Ok(EntryList::deserialize(&data).map_err(ChainError::Decode)?.0),
            None => Ok(Vec::new()),
        }
    }

    /// Load the whole index
    pub fn snapshot(&self) -> Result<UtxoSnapshot> {
        let mut all = UtxoSnapshot::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            if &*key == TOP_KEY {
                continue;
            }
            let txid = Hash256::from_slice(&key).map_err(ChainError::Decode)?;
            let entries = EntryList::deserialize(&value).map_err(ChainError::Decode)?.0;
            all.insert(txid, entries);
        }
        Ok(all)
    }

    /// Replace the index with `snapshot` and set the checkpoint to `top`.
    ///
    /// The old checkpoint disappears with the clear, so an interrupted rebuild
    /// is redone from scratch on the next reindex.
    pub fn rebuild(&self, snapshot: &UtxoSnapshot, top: &Hash256) -> Result<()> {
        self.tree.clear()?;

        let mut batch = Batch::default();
        for (txid, entries) in snapshot {
            if !entries.is_empty() {
                batch.insert(txid.as_bytes().as_slice(), EntryList(entries.clone()).serialize());
            }
        }
        batch.insert(TOP_KEY, top.as_bytes().as_slice());
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    /// Fold one transaction of block `block_hash` into the index atomically:
    /// drop the outputs it spends, add its own, advance the checkpoint.
    pub fn apply_transaction(&self, tx: &Transaction, block_hash: &Hash256) -> Result<()> {
        let mut touched: HashMap<Hash256, Vec<UtxoEntry>> = HashMap::new();

        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let entries = match touched.remove(&input.prev_tx_hash) {
                    Some(entries) => entries,
                    None => self.get(&input.prev_tx_hash)?,
                };
                let remaining = entries
                    .into_iter()
                    .filter(|entry| entry.index != input.prev_index)
                    .collect();
                touched.insert(input.prev_tx_hash, remaining);
            }
        }

        let fresh = UtxoEntry::from_transaction(tx);
        if let Some(first) = fresh.first() {
            touched.insert(first.txid, fresh);
        }

        let mut batch = Batch::default();
        for (txid, entries) in touched {
            if entries.is_empty() {
                batch.remove(txid.as_bytes().as_slice());
            } else {
                batch.insert(txid.as_bytes().as_slice(), EntryList(entries).serialize());
            }
        }
        batch.insert(TOP_KEY, block_hash.as_bytes().as_slice());
        self.tree.apply_batch(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TxInput;

    fn utxo_set() -> UtxoSet {
        let db = sled::Config::new().temporary(true).open().unwrap();
        UtxoSet::new(db.open_tree("utxo").unwrap())
    }

    fn funding() -> Transaction {
        Transaction::new(
            vec![TxInput::new(Hash256::new([1; 32]), 0, vec![1])],
            vec![TxOutput::new(100, vec![1; 20]), TxOutput::new(200, vec![2; 20])],
        )
    }

    #[test]
    fn test_entry_list_encoding() {
        let entries = UtxoEntry::from_transaction(&funding());
        let bytes = EntryList(entries.clone()).serialize();
        assert_eq!(EntryList::deserialize(&bytes).unwrap().0, entries);
    }

    #[test]
    fn test_checkpoint_starts_empty() {
        let set = utxo_set();
        assert_eq!(set.checkpoint().unwrap(), None);
        assert!(set.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_apply_transaction_spends_and_creates() {
        let set = utxo_set();
        let fund = funding();
        let block = Hash256::new([9; 32]);
        set.apply_transaction(&fund, &block).unwrap();
        assert_eq!(set.get(&fund.txid()).unwrap().len(), 2);
        assert_eq!(set.checkpoint().unwrap(), Some(block));

        let spend = Transaction::new(
            vec![TxInput::new(fund.txid(), 1, vec![])],
            vec![TxOutput::new(150, vec![3; 20])],
        );
        set.apply_transaction(&spend, &block).unwrap();

        let left = set.get(&fund.txid()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].index, 0);
        assert_eq!(set.get(&spend.txid()).unwrap()[0].output.value, 150);
    }

    #[test]
    fn test_fully_spent_entry_removed() {
        let set = utxo_set();
        let fund = funding();
        let block = Hash256::new([9; 32]);
        set.apply_transaction(&fund, &block).unwrap();

        let spend = Transaction::new(
            vec![TxInput::new(fund.txid(), 0, vec![]), TxInput::new(fund.txid(), 1, vec![])],
            vec![TxOutput::new(300, vec![3; 20])],
        );
        set.apply_transaction(&spend, &block).unwrap();

        let snapshot = set.snapshot().unwrap();
        assert!(!snapshot.contains_key(&fund.txid()));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let set = utxo_set();
        let stale = funding();
        set.apply_transaction(&stale, &Hash256::new([1; 32])).unwrap();

        let fresh = Transaction::coinbase(b"x".to_vec(), vec![4; 20]);
        let mut snapshot = UtxoSnapshot::new();
        snapshot.insert(fresh.txid(), UtxoEntry::from_transaction(&fresh));
        set.rebuild(&snapshot, &Hash256::new([2; 32])).unwrap();

        assert_eq!(set.snapshot().unwrap(), snapshot);
        assert_eq!(set.checkpoint().unwrap(), Some(Hash256::new([2; 32])));

        set.clear_checkpoint().unwrap();
        assert_eq!(set.checkpoint().unwrap(), None);
    }
}

// Ledger store: tip tracking, iteration, UTXO reindex and reorganization

use crate::consensus::{verify_input_signature, BlockValidator, Miner, ValidationError};
use crate::core::{Block, Hash256, Transaction, GENESIS_BITS};
use crate::error::{ChainError, Result};
use crate::storage::{BlockchainDB, Storage, UtxoEntry, UtxoSnapshot};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};

/// The local chain and its UTXO index.
///
/// Tip height and hash change only in `put_block` and `reorg`. The in-memory
/// UTXO snapshot is refreshed after every reindex.
pub struct Blockchain {
    storage: Storage,
    validator: BlockValidator,
    miner: Miner,
    height: u32,
    tip: Hash256,
    utxos: UtxoSnapshot,
}

/// Walks the chain from a starting block back towards genesis.
///
/// Each step yields the current block and moves to its parent. The walk ends
/// when a parent lookup misses. Exhausted iterators stay exhausted.
pub struct ChainIter<'a> {
    db: &'a BlockchainDB,
    next: Option<Hash256>,
}

impl Iterator for ChainIter<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.next.take()?;
        match self.db.get_block(&hash) {
            Ok(Some(block)) => {
                self.next = Some(block.header.prev_block_hash);
                Some(Ok(block))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

impl Blockchain {
    /// Load the chain from `storage`, creating it with the genesis block if empty
    pub fn open(storage: Storage) -> Result<Self> {
        let mut chain = Self {
            storage,
            validator: BlockValidator::new(GENESIS_BITS),
            miner: Miner::new(GENESIS_BITS),
            height: 0,
            tip: Hash256::zero(),
            utxos: UtxoSnapshot::new(),
        };

        match chain.storage.blockchain.get_tip()? {
            Some(tip) => {
                let block = chain
                    .storage
                    .blockchain
                    .get_block(&tip)?
                    .ok_or(ChainError::BlockNotFound(tip))?;
                chain.tip = tip;
                chain.height = block.height();
                log::info!("Loaded chain at height {} (tip {})", chain.height, tip);

                chain.reindex_utxo()?;
                chain.refresh_utxos()?;
            }
            None => {
                log::info!("Empty store, adding genesis block");
                chain.add_block(&Block::genesis())?;
            }
        }

        Ok(chain)
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tip(&self) -> Hash256 {
        self.tip
    }

    /// Current in-memory UTXO snapshot
    pub fn utxos(&self) -> &UtxoSnapshot {
        &self.utxos
    }

    /// Persist a block; advance the tip if it is higher than the current one
    pub fn put_block(&mut self, block: &Block) -> Result<()> {
        let advance = block.height() > self.height;
        let hash = self.storage.blockchain.store_block(block, advance)?;
        if advance {
            self.height = block.height();
            self.tip = hash;
        }
        Ok(())
    }

    /// Append a block directly on top of the tip.
    ///
    /// Rejects anything but `height + 1`, then checks structure, merkle root,
    /// parent link and proof of work before storing and reindexing.
    pub fn add_block(&mut self, block: &Block) -> Result<()> {
        let expected = self.height + 1;
        if block.height() != expected {
            return Err(ChainError::HeightMismatch {
                expected,
                got: block.height(),
            });
        }

        if block.header.prev_block_hash != self.tip {
            return Err(ValidationError::PrevHashMismatch {
                expected: self.tip,
                got: block.header.prev_block_hash,
            }
            .into());
        }
        self.validator.validate_block(block)?;

        self.put_block(block)?;
        self.reindex_utxo()?;
        self.refresh_utxos()?;

        log::info!("Added block {} at height {}", self.tip, self.height);
        Ok(())
    }

    pub fn get_block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>> {
        self.storage.blockchain.get_block(hash)
    }

    /// Fresh iterator starting at the tip
    pub fn iter(&self) -> ChainIter<'_> {
        self.iter_from(self.tip)
    }

    fn iter_from(&self, start: Hash256) -> ChainIter<'_> {
        ChainIter {
            db: &self.storage.blockchain,
            next: if start.is_zero() { None } else { Some(start) },
        }
    }

    /// All blocks, tip first when `desc`, genesis first otherwise
    pub fn blocks(&self, desc: bool) -> Result<Vec<Block>> {
        let mut blocks = self.iter().collect::<Result<Vec<_>>>()?;
        if !desc {
            blocks.reverse();
        }
        Ok(blocks)
    }

    /// All block hashes, tip first when `desc`, genesis first otherwise
    pub fn block_hashes(&self, desc: bool) -> Result<Vec<Hash256>> {
        let mut hashes = Vec::new();
        for block in self.iter() {
            hashes.push(block?.hash());
        }
        if !desc {
            hashes.reverse();
        }
        Ok(hashes)
    }

    /// Hashes of the blocks after `hash`, ascending. `None` if `hash` is not
    /// on the current chain.
    fn hashes_after(&self, hash: &Hash256) -> Result<Option<Vec<Hash256>>> {
        let mut after = Vec::new();
        for block in self.iter() {
            let current = block?.hash();
            if current == *hash {
                after.reverse();
                return Ok(Some(after));
            }
            after.push(current);
        }
        Ok(None)
    }

    /// Hashes strictly after `hash` in ascending order. Walks the whole chain
    /// when `hash` is not found.
    pub fn block_hashes_after_hash(&self, hash: &Hash256) -> Result<Vec<Hash256>> {
        match self.hashes_after(hash)? {
            Some(hashes) => Ok(hashes),
            None => self.block_hashes(false),
        }
    }

    /// Make the stored block `new_tip` the tip, then rebuild the UTXO index.
    ///
    /// `new_tip` may sit on the current chain or on a stored branch that forks
    /// off it. Current-chain blocks after the fork point are discarded. No
    /// chain-work comparison is made.
    pub fn reorg(&mut self, new_tip: &Hash256) -> Result<()> {
        self.reorg_blockchain(new_tip)?;
        self.reorg_utxo()
    }

    /// Last block shared by the current chain and the ancestry of `hash`
    fn fork_point(&self, hash: &Hash256) -> Result<Option<Hash256>> {
        let current: HashSet<Hash256> = self.block_hashes(true)?.into_iter().collect();
        for block in self.iter_from(*hash) {
            let candidate = block?.hash();
            if current.contains(&candidate) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn reorg_blockchain(&mut self, new_tip: &Hash256) -> Result<()> {
        let block = self
            .get_block_by_hash(new_tip)?
            .ok_or(ChainError::BlockNotFound(*new_tip))?;
        let fork = self
            .fork_point(new_tip)?
            .ok_or(ChainError::NotOnChain(*new_tip))?;
        let discarded = self
            .hashes_after(&fork)?
            .ok_or(ChainError::NotOnChain(fork))?;

        self.storage.blockchain.truncate(&discarded, new_tip)?;
        self.tip = *new_tip;
        self.height = block.height();

        log::info!(
            "Reorganized to {} at height {} (fork at {}), dropped {} blocks",
            new_tip,
            self.height,
            fork,
            discarded.len()
        );
        Ok(())
    }

    fn reorg_utxo(&mut self) -> Result<()> {
        self.storage.utxo_set.clear_checkpoint()?;
        self.reindex_utxo()?;
        self.refresh_utxos()
    }

    /// Derive the UTXO set from scratch by walking the whole chain.
    ///
    /// Spends are collected over every block first, so an output is dropped
    /// no matter where its spender sits relative to it.
    pub fn scan_utxos(&self) -> Result<UtxoSnapshot> {
        let blocks = self.blocks(true)?;

        let mut spent: HashSet<(Hash256, u32)> = HashSet::new();
        for tx in blocks.iter().flat_map(|b| &b.transactions) {
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                spent.insert((input.prev_tx_hash, input.prev_index));
            }
        }

        let mut utxos = UtxoSnapshot::new();
        for tx in blocks.iter().flat_map(|b| &b.transactions) {
            let unspent: Vec<UtxoEntry> = UtxoEntry::from_transaction(tx)
                .into_iter()
                .filter(|entry| !spent.contains(&(entry.txid, entry.index)))
                .collect();
            if !unspent.is_empty() {
                utxos.insert(tx.txid(), unspent);
            }
        }

        Ok(utxos)
    }

    /// Bring the stored UTXO index up to the tip.
    ///
    /// No checkpoint, or a checkpoint off the current chain, forces a full
    /// rebuild. A checkpoint at the tip is a no-op. Otherwise only the blocks
    /// after the checkpoint are applied, one transaction at a time.
    pub fn reindex_utxo(&mut self) -> Result<()> {
        let checkpoint = self.storage.utxo_set.checkpoint()?;

        let pending = match checkpoint {
            Some(top) if top == self.tip => {
                log::debug!("UTXO index already at tip {}", top);
                return Ok(());
            }
            Some(top) => self.hashes_after(&top)?,
            None => None,
        };

        match pending {
            Some(hashes) => {
                log::debug!("Applying {} blocks to the UTXO index", hashes.len());
                for hash in hashes {
                    let block = self
                        .get_block_by_hash(&hash)?
                        .ok_or(ChainError::BlockNotFound(hash))?;
                    for tx in &block.transactions {
                        self.storage.utxo_set.apply_transaction(tx, &hash)?;
                    }
                }
            }
            None => {
                log::info!("Rebuilding UTXO index at height {}", self.height);
                let utxos = self.scan_utxos()?;
                self.storage.utxo_set.rebuild(&utxos, &self.tip)?;
            }
        }
        Ok(())
    }

    fn refresh_utxos(&mut self) -> Result<()> {
        self.utxos = self.storage.utxo_set.snapshot()?;
        Ok(())
    }

    fn find_utxo(&self, txid: &Hash256, index: u32) -> Option<&UtxoEntry> {
        self.utxos
            .get(txid)
            .and_then(|entries| entries.iter().find(|entry| entry.index == index))
    }

    /// Check a transaction against the UTXO snapshot.
    ///
    /// Coinbase transactions pass. Every other input must reference an unspent
    /// output (each at most once) and carry a valid signature from its owner,
    /// and the outputs may not spend more than the inputs hold.
    pub fn verify_transaction(&self, tx: &Transaction) -> std::result::Result<(), ValidationError> {
        if tx.is_coinbase() {
            return Ok(());
        }
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(ValidationError::EmptyTransaction);
        }

        let mut seen = HashSet::new();
        let mut input_total = 0u64;
        for (i, input) in tx.inputs.iter().enumerate() {
            let missing = ValidationError::MissingUtxo {
                txid: input.prev_tx_hash,
                index: input.prev_index,
            };
            if !seen.insert((input.prev_tx_hash, input.prev_index)) {
                return Err(missing);
            }
            let entry = self
                .find_utxo(&input.prev_tx_hash, input.prev_index)
                .ok_or(missing)?;

            verify_input_signature(tx, i, &entry.output.script_pubkey)?;
            input_total = input_total.saturating_add(entry.output.value);
        }

        let output_total = tx.total_output_value();
        if output_total > input_total {
            return Err(ValidationError::OutputsExceedInputs {
                inputs: input_total,
                outputs: output_total,
            });
        }
        Ok(())
    }

    /// Search the chain, tip first, for a transaction
    pub fn find_transaction(&self, txid: &Hash256) -> Result<Option<Transaction>> {
        for block in self.iter() {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.txid() == *txid) {
                return Ok(Some(tx));
            }
        }
        Ok(None)
    }

    /// Check a batch bound for one block: each transaction on its own, and no
    /// outpoint spent by two of them.
    pub fn verify_transactions(&self, txs: &[Transaction]) -> std::result::Result<(), ValidationError> {
        let mut spent = HashSet::new();
        for tx in txs.iter().filter(|tx| !tx.is_coinbase()) {
            self.verify_transaction(tx)?;
            for input in &tx.inputs {
                if !spent.insert((input.prev_tx_hash, input.prev_index)) {
                    return Err(ValidationError::MissingUtxo {
                        txid: input.prev_tx_hash,
                        index: input.prev_index,
                    });
                }
            }
        }
        Ok(())
    }

    /// Unmined block on top of the tip paying `miner`.
    ///
    /// `transactions` are checked against the current UTXO snapshot. The block
    /// only extends this tip, so a later `add_block` fails if the tip moves.
    pub fn block_template(&self, miner: &[u8], transactions: Vec<Transaction>) -> Result<Block> {
        self.verify_transactions(&transactions)?;
        Ok(Block::new_template(miner, self.tip, self.height + 1, transactions, unix_time()))
    }

    /// Solve proof of work for `block` in place
    pub fn solve(&self, block: &mut Block, cancel: &AtomicBool) -> Result<()> {
        let result = self
            .miner
            .mine(&mut block.header, cancel)
            .ok_or(ChainError::MiningCancelled)?;
        log::info!(
            "Mined block {} at height {} ({} attempts, {:.0} H/s)",
            result.hash,
            block.height(),
            result.attempts,
            result.hash_rate()
        );
        Ok(())
    }

    /// Mine a block with `transactions` on the tip and append it
    pub fn mine_block(&mut self, miner: &[u8], transactions: Vec<Transaction>) -> Result<Block> {
        let mut block = self.block_template(miner, transactions)?;
        self.solve(&mut block, &AtomicBool::new(false))?;
        self.add_block(&block)?;
        Ok(block)
    }

    /// Mine a block holding only the coinbase
    pub fn mine_empty_block(&mut self, miner: &[u8]) -> Result<Block> {
        self.mine_block(miner, Vec::new())
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }
}

// Block data structures

use crate::core::{Hash256, hash256, merkle_root, Transaction, Serializable, GENESIS_BITS};
use std::io::{Read, Cursor};
use super::serialize::{write_varint, read_varint, read_u32, read_hash};

/// Size of the hashed part of a header
pub const HEADER_SIZE: usize = 80;

/// Genesis block constants
pub const GENESIS_TIMESTAMP: u32 = 1597600039;
pub const GENESIS_NONCE: u32 = 99;
pub const GENESIS_COINBASE_DATA: &str =
    "genesis block created by 1Hmp4DDMQK9uxQoPqF2QiSEAseN3foySow";
pub const GENESIS_PUBKEY_HASH: [u8; 20] = [
    0xb7, 0xfb, 0x98, 0x3d, 0xac, 0xeb, 0x6f, 0x73, 0x16, 0xa2,
    0x0b, 0xb4, 0xbf, 0xc4, 0x12, 0xed, 0x1f, 0x5e, 0x23, 0x48,
];

/// Block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: Hash256,
    pub merkle_root: Hash256,
    /// Unix seconds
    pub timestamp: u32,
    /// Difficulty target (compact format)
    pub bits: u32,
    pub nonce: u32,
    /// Position in the chain, genesis is 1. Not covered by the hash.
    pub height: u32,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_block_hash: Hash256,
        merkle_root: Hash256,
        timestamp: u32,
        bits: u32,
        nonce: u32,
        height: u32,
    ) -> Self {
        Self {
            version,
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
            height,
        }
    }

    /// Identity hash of the header
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// Mining serialization (always 80 bytes): integers little-endian,
    /// embedded hashes byte-reversed.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.prev_block_hash.reversed());
        buf.extend_from_slice(&self.merkle_root.reversed());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Read the 80 hashed bytes; height is left at 0
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, String> {
        let version = read_u32(reader).map_err(|e| e.to_string())?;
        let prev_block_hash = read_hash(reader).map_err(|e| e.to_string())?;
        let merkle_root = read_hash(reader).map_err(|e| e.to_string())?;
        let timestamp = read_u32(reader).map_err(|e| e.to_string())?;
        let bits = read_u32(reader).map_err(|e| e.to_string())?;
        let nonce = read_u32(reader).map_err(|e| e.to_string())?;

        Ok(Self {
            version,
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
            height: 0,
        })
    }
}

/// Block - contains header and transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// The fixed genesis block (height 1)
    pub fn genesis() -> Self {
        let coinbase_tx = Transaction::coinbase(
            GENESIS_COINBASE_DATA.as_bytes().to_vec(),
            GENESIS_PUBKEY_HASH.to_vec(),
        );
        let merkle_root = Self::calculate_merkle_root(std::slice::from_ref(&coinbase_tx));

        let header = BlockHeader::new(
            0,
            Hash256::zero(),
            merkle_root,
            GENESIS_TIMESTAMP,
            GENESIS_BITS,
            GENESIS_NONCE,
            1,
        );

        Self {
            header,
            transactions: vec![coinbase_tx],
        }
    }

    /// Unmined block on top of `prev`: a coinbase paying `miner` followed by `transactions`
    pub fn new_template(
        miner: &[u8],
        prev: Hash256,
        height: u32,
        transactions: Vec<Transaction>,
        timestamp: u32,
    ) -> Self {
        let data = format!("mined by {} at height {}", hex::encode(miner), height);
        let mut txs = Vec::with_capacity(transactions.len() + 1);
        txs.push(Transaction::coinbase(data.into_bytes(), miner.to_vec()));
        txs.extend(transactions);

        let merkle_root = Self::calculate_merkle_root(&txs);
        let header = BlockHeader::new(0, prev, merkle_root, timestamp, GENESIS_BITS, 0, height);

        Self {
            header,
            transactions: txs,
        }
    }

    /// Merkle root over the transaction ids in listed order
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        let hashes: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
        merkle_root(&hashes)
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }
}

impl Serializable for Block {
    /// Header (80 bytes) ‖ height u32 ‖ varint tx count ‖ transactions
    fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header.serialize();
        buf.extend_from_slice(&self.header.height.to_le_bytes());
        let _ = write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            let _ = tx.write_to(&mut buf);
        }
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);

        let mut header = BlockHeader::read_from(&mut cursor)?;
        header.height = read_u32(&mut cursor).map_err(|e| e.to_string())?;

        let tx_count = read_varint(&mut cursor).map_err(|e| e.to_string())?;
        let mut transactions = Vec::new();
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(&mut cursor)?);
        }

        if cursor.position() as usize != data.len() {
            return Err(format!(
                "{} trailing bytes after block",
                data.len() - cursor.position() as usize
            ));
        }

        Ok(Self {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TxInput, TxOutput};

    #[test]
    fn test_block_header_serialization() {
        let header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 1234567890, 0x1fffffff, 0, 7);

        let serialized = header.serialize();
        assert_eq!(serialized.len(), HEADER_SIZE);

        let decoded = BlockHeader::read_from(&mut Cursor::new(serialized)).unwrap();
        assert_eq!(decoded.nonce, header.nonce);
        assert_eq!(decoded.height, 0);
    }

    #[test]
    fn test_header_hash_vector() {
        let header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 1234567890, 0x1fffffff, 0, 1);
        assert_eq!(
            header.hash().to_hex(),
            "26c39ad3ba4dbdfd3ebc2b3645be6c511b8a2bebcd1d327f3c5db30cfca68757"
        );
    }

    #[test]
    fn test_height_not_hashed() {
        let mut header = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 1234567890, 0x1fffffff, 0, 1);
        let hash = header.hash();
        header.height = 42;
        assert_eq!(header.hash(), hash);
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();
        assert_eq!(genesis.height(), 1);
        assert_eq!(genesis.transactions.len(), 1);
        assert!(genesis.transactions[0].is_coinbase());
        assert_eq!(
            genesis.hash().to_hex(),
            "00eff70f09a60a70eff6db49c4fb5bed8ad8394d9f37bcb2a631c8a3ee40dbd0"
        );
    }

    #[test]
    fn test_block_serialization_keeps_height() {
        let tx = Transaction::new(
            vec![TxInput::new(Hash256::new([1; 32]), 2, vec![3; 10])],
            vec![TxOutput::new(10, vec![4; 20])],
        );
        let block = Block::new_template(&[9; 20], Hash256::new([8; 32]), 5, vec![tx], 1_700_000_000);

        let bytes = block.serialize();
        let decoded = Block::deserialize(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.height(), 5);
    }

    #[test]
    fn test_block_without_transactions_decodes() {
        let header = BlockHeader::new(0, Hash256::zero(), Hash256::zero(), 1, GENESIS_BITS, 0, 3);
        let block = Block::new(header, vec![]);
        assert_eq!(Block::deserialize(&block.serialize()).unwrap(), block);
    }

    #[test]
    fn test_truncated_block_rejected() {
        let bytes = Block::genesis().serialize();
        assert!(Block::deserialize(&bytes[..bytes.len() - 1]).is_err());
        assert!(Block::deserialize(&bytes[..50]).is_err());
    }

    #[test]
    fn test_template_starts_with_coinbase() {
        let block = Block::new_template(&[9; 20], Hash256::new([8; 32]), 2, vec![], 1);
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_coinbase());
        assert_eq!(block.header.merkle_root, block.transactions[0].txid());
    }
}

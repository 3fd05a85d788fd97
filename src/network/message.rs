// Network protocol messages

use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};

/// Protocol version carried in `version` messages
pub const PROTOCOL_VERSION: u32 = 1;

/// Inventory type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvType {
    Block,
    Tx,
}

/// Version message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: u32,
    pub addr_from: String,
    pub start_height: u32,
}

impl VersionMessage {
    pub fn new(addr_from: String, start_height: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            addr_from,
            start_height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerackMessage {
    pub addr_from: String,
}

/// Address list; accepted on the wire but not acted on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrMessage {
    pub addr_list: String,
}

/// Inventory announcement; `getdata` reuses the same shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvMessage {
    pub addr_from: String,
    #[serde(rename = "type")]
    pub inv_type: InvType,
    #[serde(rename = "hash")]
    pub hashes: Vec<Hash256>,
}

impl InvMessage {
    pub fn new(addr_from: String, inv_type: InvType, hashes: Vec<Hash256>) -> Self {
        Self {
            addr_from,
            inv_type,
            hashes,
        }
    }
}

pub type GetDataMessage = InvMessage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksMessage {
    pub addr_from: String,
    #[serde(rename = "blockhashes")]
    pub block_hashes: Vec<Hash256>,
}

/// A transaction in its canonical encoding, hex in JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMessage {
    pub addr_from: String,
    pub transaction: String,
}

impl TxMessage {
    pub fn new(addr_from: String, tx: &Transaction) -> Self {
        Self {
            addr_from,
            transaction: hex::encode(Serializable::serialize(tx)),
        }
    }

    pub fn transaction(&self) -> Result<Transaction> {
        let bytes = hex::decode(&self.transaction).map_err(|e| ChainError::Decode(e.to_string()))?;
        <Transaction as Serializable>::deserialize(&bytes).map_err(ChainError::Decode)
    }
}

/// A batch of blocks in canonical encoding; `None` marks a block the sender lacked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub addr_from: String,
    pub block: Vec<Option<String>>,
}

impl BlockMessage {
    pub fn new(addr_from: String, blocks: &[Option<Block>]) -> Self {
        Self {
            addr_from,
            block: blocks
                .iter()
                .map(|b| b.as_ref().map(|b| hex::encode(Serializable::serialize(b))))
                .collect(),
        }
    }

    pub fn blocks(&self) -> Result<Vec<Option<Block>>> {
        self.block
            .iter()
            .map(|entry| match entry {
                Some(data) => {
                    let bytes = hex::decode(data).map_err(|e| ChainError::Decode(e.to_string()))?;
                    <Block as Serializable>::deserialize(&bytes)
                        .map(Some)
                        .map_err(ChainError::Decode)
                }
                None => Ok(None),
            })
            .collect()
    }
}

/// Wire envelope: `{"header": <kind>, "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "header", content = "payload", rename_all = "lowercase")]
pub enum Message {
    Version(VersionMessage),
    Verack(VerackMessage),
    Addr(AddrMessage),
    Inv(InvMessage),
    GetData(GetDataMessage),
    GetBlocks(GetBlocksMessage),
    Tx(TxMessage),
    Block(BlockMessage),
}

impl Message {
    /// Header tag of this message
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Verack(_) => "verack",
            Message::Addr(_) => "addr",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::GetBlocks(_) => "getblocks",
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

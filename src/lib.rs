// Minimal proof-of-work node: ledger, UTXO index, mining and peer protocol

pub mod core;
pub mod consensus;
pub mod storage;
pub mod network;
pub mod wallet;
pub mod error;
pub mod cli;

// Re-exports for convenience
pub use core::{Block, BlockHeader, Hash256, Transaction, TxInput, TxOutput};
pub use consensus::{Miner, Target, BlockValidator, ValidationError};
pub use storage::{Storage, Blockchain, BlockchainDB, UtxoSet, UtxoEntry};
pub use network::{Node, NodeConfig, Message};
pub use error::{ChainError, Result};
pub use cli::Cli;

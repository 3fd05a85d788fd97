// Crate-wide error type

use crate::consensus::ValidationError;
use crate::core::Hash256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u32, got: u32 },

    #[error("block not found: {0}")]
    BlockNotFound(Hash256),

    #[error("block {0} is not on the current chain")]
    NotOnChain(Hash256),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("mining is disabled on this node")]
    MiningDisabled,

    #[error("mining cancelled")]
    MiningCancelled,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChainError>;

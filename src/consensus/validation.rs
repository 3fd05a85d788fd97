// Block structure and signature validation

use crate::core::{hash160, Block, BlockHeader, Hash256, Transaction};
use crate::consensus::pow::Miner;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1};

/// Length of a compact ECDSA signature at the front of a script_sig
pub const SIGNATURE_SIZE: usize = 64;

/// Validation error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Block hash doesn't meet PoW target
    InvalidProofOfWork,
    /// Merkle root doesn't match calculated value
    InvalidMerkleRoot,
    /// Block has no transactions
    NoTransactions,
    /// First transaction is not coinbase
    MissingCoinbase,
    /// Coinbase transaction in non-first position
    CoinbaseNotFirst,
    /// Transaction has no inputs or outputs
    EmptyTransaction,
    /// Previous hash doesn't point at the current tip
    PrevHashMismatch { expected: Hash256, got: Hash256 },
    /// Referenced output is unknown or already spent
    MissingUtxo { txid: Hash256, index: u32 },
    /// script_sig too short to hold signature and public key
    MalformedScriptSig(usize),
    /// Public key doesn't hash to the referenced output's pubkey hash
    PubkeyHashMismatch(usize),
    /// Signature verification failed for an input
    InvalidSignature(usize),
    /// Outputs spend more than the inputs provide
    OutputsExceedInputs { inputs: u64, outputs: u64 },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ValidationError::InvalidProofOfWork => write!(f, "Invalid proof of work"),
            ValidationError::InvalidMerkleRoot => write!(f, "Invalid merkle root"),
            ValidationError::NoTransactions => write!(f, "Block has no transactions"),
            ValidationError::MissingCoinbase => write!(f, "Missing coinbase transaction"),
            ValidationError::CoinbaseNotFirst => write!(f, "Coinbase not in first position"),
            ValidationError::EmptyTransaction => write!(f, "Empty transaction"),
            ValidationError::PrevHashMismatch { expected, got } => {
                write!(f, "Previous hash {} does not match tip {}", got, expected)
            }
            ValidationError::MissingUtxo { txid, index } => {
                write!(f, "Missing UTXO {}:{}", txid, index)
            }
            ValidationError::MalformedScriptSig(i) => write!(f, "Malformed script_sig on input {}", i),
            ValidationError::PubkeyHashMismatch(i) => write!(f, "Public key hash mismatch on input {}", i),
            ValidationError::InvalidSignature(i) => write!(f, "Invalid signature on input {}", i),
            ValidationError::OutputsExceedInputs { inputs, outputs } => {
                write!(f, "Outputs total {} exceeds inputs total {}", outputs, inputs)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Block validator
pub struct BlockValidator {
    /// PoW miner for verification
    miner: Miner,
}

impl BlockValidator {
    /// Create a new block validator with fixed difficulty
    pub fn new(bits: u32) -> Self {
        Self {
            miner: Miner::new(bits),
        }
    }

    /// Check proof of work. The genesis header (zero previous hash) is exempt.
    pub fn validate_header(&self, header: &BlockHeader) -> Result<(), ValidationError> {
        if !header.prev_block_hash.is_zero() && !self.miner.verify(header) {
            return Err(ValidationError::InvalidProofOfWork);
        }
        Ok(())
    }

    /// Validate a block's structure: PoW, coinbase placement and merkle root
    pub fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        self.validate_header(&block.header)?;

        if block.transactions.is_empty() {
            return Err(ValidationError::NoTransactions);
        }

        if !block.transactions[0].is_coinbase() {
            return Err(ValidationError::MissingCoinbase);
        }

        for tx in &block.transactions[1..] {
            if tx.is_coinbase() {
                return Err(ValidationError::CoinbaseNotFirst);
            }
        }

        for tx in &block.transactions {
            self.validate_transaction(tx)?;
        }

        let calculated_merkle = Block::calculate_merkle_root(&block.transactions);
        if calculated_merkle != block.header.merkle_root {
            return Err(ValidationError::InvalidMerkleRoot);
        }

        Ok(())
    }

    /// Basic structure check
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), ValidationError> {
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(ValidationError::EmptyTransaction);
        }
        Ok(())
    }
}

/// Verify input `index` of `tx` against the referenced output's script_pubkey.
///
/// The script_sig holds a 64-byte compact signature followed by the signer's
/// public key. The signed digest is `Transaction::signature_hash`.
pub fn verify_input_signature(
    tx: &Transaction,
    index: usize,
    script_pubkey: &[u8],
) -> Result<(), ValidationError> {
    let input = tx.inputs.get(index).ok_or(ValidationError::MalformedScriptSig(index))?;
    if input.script_sig.len() <= SIGNATURE_SIZE {
        return Err(ValidationError::MalformedScriptSig(index));
    }
    let (sig_bytes, pubkey_bytes) = input.script_sig.split_at(SIGNATURE_SIZE);

    if hash160(pubkey_bytes).as_slice() != script_pubkey {
        return Err(ValidationError::PubkeyHashMismatch(index));
    }

    let signature = Signature::from_compact(sig_bytes)
        .map_err(|_| ValidationError::MalformedScriptSig(index))?;
    let public_key = PublicKey::from_slice(pubkey_bytes)
        .map_err(|_| ValidationError::MalformedScriptSig(index))?;
    let digest = tx
        .signature_hash(index, script_pubkey)
        .ok_or(ValidationError::MalformedScriptSig(index))?;

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&Message::from_digest(digest), &signature, &public_key)
        .map_err(|_| ValidationError::InvalidSignature(index))
}

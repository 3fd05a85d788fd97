// Proof of Work implementation

use crate::core::{BlockHeader, Hash256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often the mining loop checks its cancel flag
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Difficulty target representation
#[derive(Debug, Clone, Copy)]
pub struct Target {
    /// Compact representation (bits field in block header)
    pub bits: u32,
}

impl Target {
    pub fn from_bits(bits: u32) -> Self {
        Self { bits }
    }

    /// Expand compact bits into a 256-bit big-endian target.
    ///
    /// The high byte is the exponent `e`; the three coefficient bytes land at
    /// offset `32 - e`. Bytes falling outside the field are dropped.
    pub fn to_hash256(&self) -> Hash256 {
        let exponent = (self.bits >> 24) as i64;
        let coefficient = (self.bits & 0x00ff_ffff).to_be_bytes();

        let mut target = [0u8; 32];
        for (i, byte) in coefficient[1..].iter().enumerate() {
            let pos = 32 - exponent + i as i64;
            if (0..32).contains(&pos) {
                target[pos as usize] = *byte;
            }
        }

        Hash256::new(target)
    }

    /// Check if a hash meets this target (hash < target)
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        hash < &self.to_hash256()
    }
}

/// Proof of Work miner
pub struct Miner {
    /// Fixed difficulty target
    pub target: Target,
    /// Cached target hash for fast comparison
    target_hash: Hash256,
}

impl Miner {
    pub fn new(bits: u32) -> Self {
        let target = Target::from_bits(bits);
        let target_hash = target.to_hash256();
        Self {
            target,
            target_hash,
        }
    }

    /// Search for a nonce that puts the header hash below the target.
    ///
    /// Nonces start at 0. When the nonce space is exhausted the timestamp is
    /// bumped and the search restarts. Returns `None` once `cancel` is set.
    pub fn mine(&self, header: &mut BlockHeader, cancel: &AtomicBool) -> Option<MiningResult> {
        let start_time = Instant::now();
        let mut attempts = 0u64;

        loop {
            for nonce in 0..=u32::MAX {
                if attempts % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                    log::debug!("Mining cancelled after {} attempts", attempts);
                    return None;
                }

                header.nonce = nonce;
                let hash = header.hash();
                attempts += 1;

                if hash < self.target_hash {
                    return Some(MiningResult {
                        nonce,
                        hash,
                        attempts,
                        duration: start_time.elapsed(),
                    });
                }

                if attempts % 1_000_000 == 0 {
                    let elapsed = start_time.elapsed();
                    log::debug!("Mining attempts: {} ({:.1} KH/s)",
                        attempts,
                        attempts as f64 / elapsed.as_secs_f64() / 1000.0
                    );
                }
            }

            header.timestamp = header.timestamp.wrapping_add(1);
            log::debug!("Nonce space exhausted, timestamp bumped to {}", header.timestamp);
        }
    }

    /// Verify that a block header satisfies PoW
    pub fn verify(&self, header: &BlockHeader) -> bool {
        self.target.is_valid_hash(&header.hash())
    }
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    /// The nonce that was found
    pub nonce: u32,
    /// The resulting hash
    pub hash: Hash256,
    pub attempts: u64,
    pub duration: Duration,
}

impl MiningResult {
    /// Hashes per second
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}

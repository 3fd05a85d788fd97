// Hashing utilities

use sha2::{Sha256, Digest};
use crate::core::Hash256;

/// SHA256(SHA256(data)), raw digest order
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);
    let mut result = [0u8; 32];
    result.copy_from_slice(&second_hash);
    result
}

/// Identity hash: the double SHA256 digest byte-reversed into display order
pub fn hash256(data: &[u8]) -> Hash256 {
    Hash256::from_reversed(double_sha256(data))
}

/// RIPEMD160(SHA256(data)) - the public key hash
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::{Ripemd160, Digest as RipemdDigest};
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut result = [0u8; 20];
    result.copy_from_slice(&ripemd);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_is_reversed_double_sha() {
        let raw = double_sha256(b"a");
        let hash = hash256(b"a");

        let mut reversed = raw;
        reversed.reverse();
        assert_eq!(hash.as_bytes(), &reversed);
        assert_eq!(
            hash.to_hex(),
            "d8f244c159278ea8cfffcbe1c463edef33d92d11d36ac3c62efd3eb7ff3a5dbf"
        );
    }

    #[test]
    fn test_hash256_empty() {
        // sha256d("") = 5df6e0e2...
        assert_eq!(
            hex::encode(double_sha256(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_hash160() {
        let data = b"test data";
        let hash = hash160(data);
        assert_eq!(hash.len(), 20);
        assert_eq!(hash, hash160(data));
    }
}

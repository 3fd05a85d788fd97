// Merkle root over transaction ids

use crate::core::{Hash256, hash256};

/// Compute the merkle root of `hashes`, taken in order.
///
/// Leaves are used as given. Each parent is `hash256(left ‖ right)`, and an
/// odd level duplicates its last hash. An empty input yields the zero hash.
pub fn merkle_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::zero();
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(left);

                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(left.as_bytes());
                combined[32..].copy_from_slice(right.as_bytes());
                hash256(&combined)
            })
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(data: &[u8]) -> Hash256 {
        hash256(data)
    }

    #[test]
    fn test_single_leaf_is_root() {
        let a = leaf(b"a");
        assert_eq!(merkle_root(&[a]), a);
    }

    #[test]
    fn test_two_leaves() {
        let root = merkle_root(&[leaf(b"a"), leaf(b"b")]);
        assert_eq!(
            root.to_hex(),
            "b893a63a575c1fd0c68070835b2956f1fc9bed5b73f4d4d5ca4374703a9587a5"
        );
    }

    #[test]
    fn test_order_sensitive() {
        let (a, b) = (leaf(b"a"), leaf(b"b"));
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        let (a, b, c) = (leaf(b"a"), leaf(b"b"), leaf(b"c"));
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c, c]));
    }

    #[test]
    fn test_empty() {
        assert_eq!(merkle_root(&[]), Hash256::zero());
    }
}

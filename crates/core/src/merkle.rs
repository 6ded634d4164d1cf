//! Binary merkle root used for the transaction, evidence and state commitments.

use crate::hash::{hash_concat, Hash};

/// Compute the merkle root of a list of hashes.
///
/// Returns the zero hash for an empty list. An odd node at any level is
/// paired with itself.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    match hashes {
        [] => Hash::ZERO,
        [single] => *single,
        _ => {
            let mut level = hashes.to_vec();
            while level.len() > 1 {
                level = level
                    .chunks(2)
                    .map(|pair| {
                        let right = pair.get(1).unwrap_or(&pair[0]);
                        hash_concat(&[pair[0].as_ref(), right.as_ref()])
                    })
                    .collect();
            }
            level[0]
        }
    }
}

//! Blake3 hashing utilities.
//!
//! BLAKE3-256 is the single commitment function of the protocol: block and
//! transaction identifiers, the state root and the producer-selection seed
//! are all derived from it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the protocol hash function, reported by chain info.
pub const HASH_ALGORITHM: &str = "blake3-256";

/// A named alias for a 32-byte(u8) array, used to represent a 256-bit hash.
pub type H256 = [u8; 32];

/// A 256-bit digest with hex Display and Debug formatting.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash(pub H256);

impl Hash {
    /// The zero hash, used as the genesis parent.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a new Hash from raw bytes.
    pub fn from_bytes(bytes: H256) -> Self {
        Self(bytes)
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &H256 {
        &self.0
    }

    /// Convert to a hex string (no prefix).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: H256 = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }

    /// Interpret the first 16 bytes as a big-endian integer.
    pub fn to_u128(&self) -> u128 {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&self.0[..16]);
        u128::from_be_bytes(buf)
    }

    /// Returns true for the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash(0x{})", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<H256> for Hash {
    fn from(bytes: H256) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash arbitrary data using Blake3.
pub fn hash(data: &[u8]) -> Hash {
    Hash(blake3::hash(data).into())
}

/// Hash multiple pieces of data as if they were concatenated.
pub fn hash_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

/// Hash the canonical (bincode) encoding of a value.
pub fn hash_encoded<T: Serialize>(value: &T) -> Hash {
    let encoded = bincode::serialize(value).expect("serialization should not fail");
    hash(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"block"), hash(b"block"));
        assert_ne!(hash(b"block"), hash(b"blocks"));
    }

    #[test]
    fn test_hash_hex_accepts_prefix() {
        let h = hash(b"tip");
        assert_eq!(Hash::from_hex(&h.to_hex()).unwrap(), h);
        assert_eq!(Hash::from_hex(&h.to_string()).unwrap(), h);
        assert!(Hash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_hash_concat_matches_flat_input() {
        assert_eq!(hash_concat(&[b"prev", b"height"]), hash(b"prevheight"));
    }

    #[test]
    fn test_hash_encoded_tracks_value() {
        assert_eq!(hash_encoded(&(1u64, 2u64)), hash_encoded(&(1u64, 2u64)));
        assert_ne!(hash_encoded(&(1u64, 2u64)), hash_encoded(&(2u64, 1u64)));
    }

    #[test]
    fn test_to_u128_is_big_endian_prefix() {
        let mut bytes = [0u8; 32];
        bytes[15] = 7;
        assert_eq!(Hash(bytes).to_u128(), 7);
        assert!(Hash::ZERO.is_zero());
    }
}

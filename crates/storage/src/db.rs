//! sled database wrapper with serialization helpers.

use serde::{de::DeserializeOwned, Serialize};
use sled::Db;
use stakechain_core::{Address, Hash};
use std::path::Path;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("Corrupt store: {0}")]
    Corrupt(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Handle to the key-value engine.
///
/// Cloning is cheap and every clone sees the same database, so each component
/// that needs storage is handed its own clone at construction.
#[derive(Clone)]
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store a serializable value.
    pub fn put<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.db.insert(key, encoded)?;
        Ok(())
    }

    /// Retrieve and deserialize a value.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: DeserializeOwned,
    {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a key.
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    /// Check if a key exists.
    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.db.contains_key(key)?)
    }

    /// All raw entries under a prefix, in key order.
    pub fn scan_prefix_raw(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db
            .scan_prefix(prefix)
            .map(|entry| {
                let (key, value) = entry?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }

    /// Keys under a prefix that sort at or after `start`.
    pub fn keys_from(&self, prefix: &[u8], start: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for entry in self.db.range(start.to_vec()..) {
            let (key, _) = entry?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// Apply multiple operations atomically.
    ///
    /// Atomicity is provided by sled's `apply_batch`: either every operation
    /// becomes visible or none does, including across a crash.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in operations {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// `account:` + address
    pub fn account_key(address: &Address) -> Vec<u8> {
        prefixed(keys::ACCOUNT, &[address.as_ref()])
    }

    /// `validator:` + address; index of accounts carrying stake state.
    pub fn validator_key(address: &Address) -> Vec<u8> {
        prefixed(keys::VALIDATOR, &[address.as_ref()])
    }

    /// `block:height:` + big-endian height, so keys sort by height.
    pub fn block_height_key(height: u64) -> Vec<u8> {
        prefixed(keys::BLOCK_BY_HEIGHT, &[&height.to_be_bytes()])
    }

    /// `block:hash:` + hash
    pub fn block_hash_key(hash: &Hash) -> Vec<u8> {
        prefixed(keys::BLOCK_BY_HASH, &[hash.as_ref()])
    }

    /// `storage:` + contract + `:` + slot
    pub fn contract_storage_key(contract: &Address, slot: &[u8]) -> Vec<u8> {
        prefixed(keys::CONTRACT_STORAGE, &[contract.as_ref(), b":", slot])
    }

    /// `code:` + code hash
    pub fn code_key(code_hash: &Hash) -> Vec<u8> {
        prefixed(keys::CODE, &[code_hash.as_ref()])
    }

    /// `slashed:` + offender + big-endian offence height
    pub fn slashed_key(offender: &Address, height: u64) -> Vec<u8> {
        prefixed(keys::SLASHED, &[offender.as_ref(), &height.to_be_bytes()])
    }
}

/// Key namespaces.
pub mod keys {
    pub const ACCOUNT: &[u8] = b"account:";
    pub const VALIDATOR: &[u8] = b"validator:";
    pub const BLOCK_BY_HEIGHT: &[u8] = b"block:height:";
    pub const BLOCK_BY_HASH: &[u8] = b"block:hash:";
    pub const CONTRACT_STORAGE: &[u8] = b"storage:";
    pub const CODE: &[u8] = b"code:";
    pub const SLASHED: &[u8] = b"slashed:";
    pub const METADATA: &[u8] = b"chain:meta";
    pub const PARAMS: &[u8] = b"chain:params";
}

fn prefixed(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = prefix.len() + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

/// Batch operation for atomic updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

impl BatchOp {
    /// Insert the bincode encoding of `value`.
    pub fn put<V: Serialize>(key: Vec<u8>, value: &V) -> Result<Self> {
        Ok(BatchOp::Insert {
            key,
            value: bincode::serialize(value)?,
        })
    }

    pub fn remove(key: Vec<u8>) -> Self {
        BatchOp::Remove { key }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let storage = Storage::open_temporary().unwrap();
        storage.put("key1", &42u64).unwrap();

        let value: Option<u64> = storage.get("key1").unwrap();
        assert_eq!(value, Some(42));
        let missing: Option<u64> = storage.get("missing").unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_clones_share_database() {
        let storage = Storage::open_temporary().unwrap();
        let other = storage.clone();
        storage.put("k", &1u8).unwrap();
        assert!(other.contains("k").unwrap());
        other.delete("k").unwrap();
        assert!(!storage.contains("k").unwrap());
    }

    #[test]
    fn test_batch_applies_inserts_and_removes() {
        let storage = Storage::open_temporary().unwrap();
        storage.put("gone", &0u64).unwrap();

        storage
            .batch(vec![
                BatchOp::put(b"a".to_vec(), &1u64).unwrap(),
                BatchOp::put(b"b".to_vec(), &2u64).unwrap(),
                BatchOp::remove(b"gone".to_vec()),
            ])
            .unwrap();

        assert_eq!(storage.get::<_, u64>("a").unwrap(), Some(1));
        assert_eq!(storage.get::<_, u64>("b").unwrap(), Some(2));
        assert!(!storage.contains("gone").unwrap());
    }

    #[test]
    fn test_flushed_data_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let storage = Storage::open(dir.path()).unwrap();
            storage.put("tip", &7u64).unwrap();
            storage.flush().unwrap();
        }
        let storage = Storage::open(dir.path()).unwrap();
        assert_eq!(storage.get::<_, u64>("tip").unwrap(), Some(7));
    }

    #[test]
    fn test_height_keys_sort_numerically() {
        assert!(Storage::block_height_key(9) < Storage::block_height_key(10));
        assert!(Storage::block_height_key(255) < Storage::block_height_key(256));
    }

    #[test]
    fn test_keys_from_stops_at_prefix_end() {
        let storage = Storage::open_temporary().unwrap();
        for h in 0..5u64 {
            storage.put(Storage::block_height_key(h), &h).unwrap();
        }
        storage.put("chain:meta", &0u8).unwrap();

        let keys = storage
            .keys_from(keys::BLOCK_BY_HEIGHT, &Storage::block_height_key(3))
            .unwrap();
        assert_eq!(
            keys,
            vec![Storage::block_height_key(3), Storage::block_height_key(4)]
        );
    }

    #[test]
    fn test_scan_prefix_raw_is_ordered() {
        let storage = Storage::open_temporary().unwrap();
        let hi = Address([0xBB; 20]);
        let lo = Address([0xAA; 20]);
        storage.put(Storage::account_key(&hi), &1u8).unwrap();
        storage.put(Storage::account_key(&lo), &2u8).unwrap();
        storage.put(Storage::validator_key(&lo), &()).unwrap();

        let entries = storage.scan_prefix_raw(keys::ACCOUNT).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, Storage::account_key(&lo));
    }
}

//! Block persistence and the chain metadata record.

use crate::db::{keys, BatchOp, Result, Storage, StorageError};
use serde::{Deserialize, Serialize};
use stakechain_core::{Block, ChainParams, Hash};
use tracing::{info, warn};

/// The single record describing the committed tip.
///
/// Written in the same batch as the block it describes, so it never points
/// past the last durable block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub height: u64,
    pub tip_hash: Hash,
    /// Everything ever minted, genesis allocations included.
    pub cumulative_supply: u64,
    pub era: u64,
}

/// What `recover` found on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub metadata: ChainMetadata,
    /// Stored blocks above the metadata height that were dropped.
    pub discarded: Vec<u64>,
}

/// Append-only block storage over [`Storage`].
#[derive(Clone)]
pub struct BlockStore {
    storage: Storage,
}

impl BlockStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// True once genesis has been committed.
    pub fn is_initialized(&self) -> Result<bool> {
        self.storage.contains(keys::METADATA)
    }

    pub fn get_metadata(&self) -> Result<Option<ChainMetadata>> {
        self.storage.get(keys::METADATA)
    }

    pub fn get_params(&self) -> Result<Option<ChainParams>> {
        self.storage.get(keys::PARAMS)
    }

    /// Write block 0, the parameters, the initial ledger and the first
    /// metadata record in one batch.
    pub fn init_genesis(
        &self,
        genesis: &Block,
        params: &ChainParams,
        metadata: &ChainMetadata,
        ledger_ops: Vec<BatchOp>,
    ) -> Result<()> {
        if !genesis.is_genesis() {
            return Err(StorageError::InvalidGenesis(
                "genesis must have height 0 and a zero parent".into(),
            ));
        }
        if metadata.height != 0 || metadata.tip_hash != genesis.hash() {
            return Err(StorageError::InvalidGenesis(
                "metadata does not describe the genesis block".into(),
            ));
        }
        if self.is_initialized()? {
            return Err(StorageError::InvalidGenesis(
                "chain already initialized".into(),
            ));
        }

        let mut ops = ledger_ops;
        ops.push(BatchOp::put(keys::PARAMS.to_vec(), params)?);
        self.push_block_ops(&mut ops, genesis, metadata)?;
        self.storage.batch(ops)?;

        info!(hash = %metadata.tip_hash, supply = metadata.cumulative_supply, "genesis committed");
        Ok(())
    }

    /// Persist a block, its hash index, the new metadata and the ledger
    /// writes of applying it, atomically.
    pub fn commit_block(
        &self,
        block: &Block,
        metadata: &ChainMetadata,
        ledger_ops: Vec<BatchOp>,
    ) -> Result<()> {
        let mut ops = ledger_ops;
        self.push_block_ops(&mut ops, block, metadata)?;
        self.storage.batch(ops)
    }

    fn push_block_ops(
        &self,
        ops: &mut Vec<BatchOp>,
        block: &Block,
        metadata: &ChainMetadata,
    ) -> Result<()> {
        let height = block.height();
        ops.push(BatchOp::put(Storage::block_height_key(height), block)?);
        ops.push(BatchOp::put(Storage::block_hash_key(&block.hash()), &height)?);
        ops.push(BatchOp::put(keys::METADATA.to_vec(), metadata)?);
        Ok(())
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        self.storage.get(Storage::block_height_key(height))
    }

    /// Height of a committed block.
    pub fn height_of(&self, hash: &Hash) -> Result<Option<u64>> {
        self.storage.get(Storage::block_hash_key(hash))
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        match self.height_of(hash)? {
            Some(height) => self.get_block_by_height(height),
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &Hash) -> Result<bool> {
        self.storage.contains(Storage::block_hash_key(hash))
    }

    /// Committed blocks in `[start, end]`, stopping at the first gap.
    pub fn get_blocks_range(&self, start: u64, end: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for height in start..=end {
            match self.get_block_by_height(height)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// Up to `count` blocks ending at the tip, newest first.
    pub fn get_recent_blocks(&self, count: usize) -> Result<Vec<Block>> {
        let Some(meta) = self.get_metadata()? else {
            return Ok(Vec::new());
        };
        let mut blocks = Vec::with_capacity(count);
        let mut height = meta.height;
        while blocks.len() < count {
            match self.get_block_by_height(height)? {
                Some(block) => blocks.push(block),
                None => break,
            }
            if height == 0 {
                break;
            }
            height -= 1;
        }
        Ok(blocks)
    }

    /// Reconcile stored blocks with the metadata record after a restart.
    ///
    /// Blocks above the metadata height are deleted, never replayed. The block
    /// at the metadata height must exist and hash to the recorded tip.
    pub fn recover(&self) -> Result<Option<Recovery>> {
        let Some(metadata) = self.get_metadata()? else {
            return Ok(None);
        };

        let tip = self
            .get_block_by_height(metadata.height)?
            .ok_or_else(|| {
                StorageError::Corrupt(format!("no block at metadata height {}", metadata.height))
            })?;
        if tip.hash() != metadata.tip_hash {
            return Err(StorageError::Corrupt(format!(
                "block at height {} does not match the metadata tip {}",
                metadata.height, metadata.tip_hash
            )));
        }

        let stray = self.storage.keys_from(
            keys::BLOCK_BY_HEIGHT,
            &Storage::block_height_key(metadata.height.saturating_add(1)),
        )?;
        let mut discarded = Vec::with_capacity(stray.len());
        let mut ops = Vec::with_capacity(stray.len() * 2);
        for key in stray {
            if let Some(block) = self.storage.get::<_, Block>(&key)? {
                discarded.push(block.height());
                ops.push(BatchOp::remove(Storage::block_hash_key(&block.hash())));
            }
            ops.push(BatchOp::remove(key));
        }
        if !ops.is_empty() {
            warn!(?discarded, height = metadata.height, "discarding blocks above committed tip");
            self.storage.batch(ops)?;
            self.storage.flush()?;
        }

        Ok(Some(Recovery {
            metadata,
            discarded,
        }))
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakechain_core::{Address, Keypair};

    fn genesis_meta(genesis: &Block) -> ChainMetadata {
        ChainMetadata {
            height: 0,
            tip_hash: genesis.hash(),
            cumulative_supply: 0,
            era: 0,
        }
    }

    fn child(parent: &Block, kp: &Keypair) -> Block {
        Block::new(
            parent.height() + 1,
            parent.hash(),
            parent.header.timestamp + 5,
            kp.address(),
            vec![],
            vec![],
            Hash::ZERO,
        )
        .signed(kp)
    }

    fn meta_for(block: &Block, supply: u64) -> ChainMetadata {
        ChainMetadata {
            height: block.height(),
            tip_hash: block.hash(),
            cumulative_supply: supply,
            era: 0,
        }
    }

    #[test]
    fn test_genesis_initializes_once() {
        let store = BlockStore::new(Storage::open_temporary().unwrap());
        let genesis = Block::genesis(100, Hash::ZERO);
        let params = ChainParams::default();

        assert!(!store.is_initialized().unwrap());
        store
            .init_genesis(&genesis, &params, &genesis_meta(&genesis), vec![])
            .unwrap();
        assert!(store.is_initialized().unwrap());
        assert_eq!(store.get_params().unwrap(), Some(params.clone()));
        assert_eq!(store.get_metadata().unwrap().unwrap().height, 0);

        let again = store.init_genesis(&genesis, &params, &genesis_meta(&genesis), vec![]);
        assert!(matches!(again, Err(StorageError::InvalidGenesis(_))));
    }

    #[test]
    fn test_commit_writes_block_index_meta_and_ledger_ops() {
        let store = BlockStore::new(Storage::open_temporary().unwrap());
        let kp = Keypair::generate();
        let genesis = Block::genesis(100, Hash::ZERO);
        store
            .init_genesis(&genesis, &ChainParams::default(), &genesis_meta(&genesis), vec![])
            .unwrap();

        let block = child(&genesis, &kp);
        let account_key = Storage::account_key(&Address([1u8; 20]));
        let ops = vec![BatchOp::put(account_key.clone(), &7u64).unwrap()];
        store.commit_block(&block, &meta_for(&block, 50), ops).unwrap();

        assert_eq!(store.get_block_by_height(1).unwrap(), Some(block.clone()));
        assert_eq!(store.get_block_by_hash(&block.hash()).unwrap(), Some(block.clone()));
        assert_eq!(store.height_of(&block.hash()).unwrap(), Some(1));
        assert_eq!(store.get_metadata().unwrap().unwrap().cumulative_supply, 50);
        assert!(store.storage.contains(account_key).unwrap());
    }

    #[test]
    fn test_ranges() {
        let store = BlockStore::new(Storage::open_temporary().unwrap());
        let kp = Keypair::generate();
        let genesis = Block::genesis(100, Hash::ZERO);
        store
            .init_genesis(&genesis, &ChainParams::default(), &genesis_meta(&genesis), vec![])
            .unwrap();
        let mut parent = genesis;
        for _ in 0..4 {
            let block = child(&parent, &kp);
            store.commit_block(&block, &meta_for(&block, 0), vec![]).unwrap();
            parent = block;
        }

        let range = store.get_blocks_range(1, 10).unwrap();
        assert_eq!(range.iter().map(Block::height).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        let recent = store.get_recent_blocks(2).unwrap();
        assert_eq!(recent.iter().map(Block::height).collect::<Vec<_>>(), vec![4, 3]);
        assert_eq!(store.get_recent_blocks(10).unwrap().len(), 5);
    }

    #[test]
    fn test_recover_discards_block_without_metadata() {
        let storage = Storage::open_temporary().unwrap();
        let store = BlockStore::new(storage.clone());
        let kp = Keypair::generate();
        let genesis = Block::genesis(100, Hash::ZERO);
        store
            .init_genesis(&genesis, &ChainParams::default(), &genesis_meta(&genesis), vec![])
            .unwrap();

        // A block write that never got its metadata update.
        let orphan = child(&genesis, &kp);
        storage.put(Storage::block_height_key(1), &orphan).unwrap();
        storage.put(Storage::block_hash_key(&orphan.hash()), &1u64).unwrap();

        let recovery = store.recover().unwrap().unwrap();
        assert_eq!(recovery.discarded, vec![1]);
        assert_eq!(recovery.metadata.height, 0);
        assert!(store.get_block_by_height(1).unwrap().is_none());
        assert!(!store.has_block(&orphan.hash()).unwrap());
    }

    #[test]
    fn test_recover_rejects_mismatched_tip() {
        let storage = Storage::open_temporary().unwrap();
        let store = BlockStore::new(storage.clone());
        let genesis = Block::genesis(100, Hash::ZERO);
        store
            .init_genesis(&genesis, &ChainParams::default(), &genesis_meta(&genesis), vec![])
            .unwrap();

        let mut bad = genesis_meta(&genesis);
        bad.tip_hash = Hash([7u8; 32]);
        storage.put(keys::METADATA, &bad).unwrap();
        assert!(matches!(store.recover(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_recover_uninitialized() {
        let store = BlockStore::new(Storage::open_temporary().unwrap());
        assert_eq!(store.recover().unwrap(), None);
    }
}

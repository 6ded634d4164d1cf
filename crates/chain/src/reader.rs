//! Read-only access for API and explorer queries.
//!
//! A [`ChainReader`] never takes the writer's locks. Chain info is a snapshot
//! published after each commit; blocks and accounts are read from committed
//! storage, which only changes by whole-block atomic batches.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stakechain_core::{Account, Address, Block, Hash};
use stakechain_storage::{BlockStore, Ledger, StorageError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Summary of the committed chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub height: u64,
    pub tip_hash: Hash,
    pub tip_timestamp: u64,
    pub cumulative_supply: u64,
    pub era: u64,
    /// Reward the next block would credit.
    pub current_reward: u64,
    pub finalized_height: u64,
    /// Validators eligible to produce the next block.
    pub active_validators: usize,
    /// Pool transactions whose nonce is next in line.
    pub pending_transactions: usize,
    /// Pool transactions waiting behind a nonce gap.
    pub queued_transactions: usize,
}

/// Lookup key for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Height(u64),
    Hash(Hash),
}

#[derive(Debug, Error)]
#[error("invalid block id '{0}': expected a height or a 32-byte hex hash")]
pub struct InvalidBlockId(String);

impl FromStr for BlockId {
    type Err = InvalidBlockId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(height) = s.parse::<u64>() {
            return Ok(BlockId::Height(height));
        }
        Hash::from_hex(s)
            .map(BlockId::Hash)
            .map_err(|_| InvalidBlockId(s.to_string()))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Height(height) => write!(f, "#{height}"),
            BlockId::Hash(hash) => write!(f, "{hash}"),
        }
    }
}

/// Cloneable read handle onto a chain.
#[derive(Clone)]
pub struct ChainReader {
    info: Arc<RwLock<Arc<ChainInfo>>>,
    blocks: BlockStore,
    ledger: Ledger,
}

impl ChainReader {
    pub(crate) fn new(info: ChainInfo, blocks: BlockStore, ledger: Ledger) -> Self {
        Self {
            info: Arc::new(RwLock::new(Arc::new(info))),
            blocks,
            ledger,
        }
    }

    /// Replace the published snapshot.
    pub(crate) fn publish(&self, info: ChainInfo) {
        *self.info.write() = Arc::new(info);
    }

    /// The snapshot as of the last publish.
    pub fn info(&self) -> Arc<ChainInfo> {
        self.info.read().clone()
    }

    pub fn get_block(&self, id: BlockId) -> Result<Option<Block>, StorageError> {
        match id {
            BlockId::Height(height) => self.blocks.get_block_by_height(height),
            BlockId::Hash(hash) => self.blocks.get_block_by_hash(&hash),
        }
    }

    pub fn get_recent_blocks(&self, count: usize) -> Result<Vec<Block>, StorageError> {
        self.blocks.get_recent_blocks(count)
    }

    pub fn get_account(&self, address: &Address) -> Result<Account, StorageError> {
        self.ledger.get_account(address)
    }
}

//! Persistent storage layer for stakechain.
//!
//! - [`Storage`]: the sled handle, serialization helpers and key layout
//! - [`BlockStore`]: blocks by height and hash, the chain metadata record and
//!   crash recovery
//! - [`Ledger`] / [`LedgerBatch`]: account state and the per-block overlay that
//!   applies transactions, stake changes, slashing and minting
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │        ChainManager (single writer) / readers            │
//! └─────────────┬───────────────────────────┬────────────────┘
//!               │ LedgerBatch::into_ops     │
//! ┌─────────────▼─────────────┐  ┌──────────▼───────────────┐
//! │ Ledger                    │  │ BlockStore               │
//! │  - accounts, stake        │  │  - block:height / :hash  │
//! │  - contract storage       │  │  - chain:meta            │
//! │  - state root             │  │  - recover()             │
//! └─────────────┬─────────────┘  └──────────┬───────────────┘
//!               │   one atomic batch per block                │
//! ┌─────────────▼──────────────────────────────────────────────▼┐
//! │                    sled (embedded key-value)                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use stakechain_core::{Address, Block, ChainParams, Hash};
//! use stakechain_storage::{BlockContext, BlockStore, ChainMetadata, Ledger, Storage};
//!
//! let storage = Storage::open("./stakechain_data").unwrap();
//! let params = ChainParams::default();
//! let ledger = Ledger::new(storage.clone(), params.clone());
//!
//! let alice = Address([0xAA; 20]);
//! let ctx = BlockContext { height: 0, timestamp: 0, producer: Address::ZERO };
//! let mut batch = ledger.batch(ctx, 0);
//! batch.mint(&alice, 1_000).unwrap();
//! let root = batch.state_root().unwrap();
//! let (ops, summary) = batch.into_ops().unwrap();
//!
//! let genesis = Block::genesis(0, root);
//! let meta = ChainMetadata {
//!     height: 0,
//!     tip_hash: genesis.hash(),
//!     cumulative_supply: summary.minted,
//!     era: 0,
//! };
//! BlockStore::new(storage).init_genesis(&genesis, &params, &meta, ops).unwrap();
//! ```

pub mod blocks;
pub mod db;
pub mod ledger;

pub use blocks::{BlockStore, ChainMetadata, Recovery};
pub use db::{keys, BatchOp, Result, Storage, StorageError};
pub use ledger::{
    BatchFailure, BatchSummary, BlockContext, Ledger, LedgerBatch, LedgerError, StateDelta,
};

//! Chain orchestration for stakechain.
//!
//! This crate brings the layers together into a running chain:
//! - **Pool**: pending transactions, fee-ordered selection
//! - **Manager**: the single writer that produces, validates and commits blocks
//! - **Reader**: lock-free snapshots for API queries
//! - **Node**: the tokio task that serializes every mutation
//!
//! # Example
//!
//! ```rust,no_run
//! use stakechain_chain::{ChainConfig, ChainManager, GenesisConfig};
//! use stakechain_core::{Keypair, COIN};
//! use stakechain_storage::Storage;
//!
//! let storage = Storage::open("./stakechain_data").unwrap();
//! let keypair = Keypair::generate();
//! let config = ChainConfig::default();
//!
//! let genesis = GenesisConfig {
//!     timestamp: 0,
//!     allocations: vec![],
//!     validators: vec![(keypair.public_key, 10_000 * COIN)],
//! };
//! ChainManager::init_genesis(&storage, &config.params, &genesis).unwrap();
//!
//! let mut chain = ChainManager::open(storage, config, Some(keypair)).unwrap();
//! let block = chain.produce_block_if_selected(1).unwrap();
//! assert!(block.is_some());
//! ```

pub mod events;
pub mod genesis;
pub mod manager;
pub mod node;
pub mod pool;
pub mod reader;

pub use events::{ChainEvent, EventSink, NullSink};
pub use genesis::{Genesis, GenesisConfig};
pub use manager::{
    BlockStatus, ChainConfig, ChainError, ChainManager, ReceiveOutcome, Result,
};
pub use node::{Node, NodeError, NodeHandle};
pub use pool::{PoolConfig, PoolError, PoolStats, TransactionPool};
pub use reader::{BlockId, ChainInfo, ChainReader, InvalidBlockId};

//! Proof of Stake consensus for stakechain.
//!
//! This crate provides:
//! - Stake-weighted producer selection seeded by the parent hash
//! - The halving reward schedule bounded by the supply cap
//! - Evidence checking and slashing
//! - Transaction and block validation
//!
//! # Example
//!
//! ```rust
//! use stakechain_consensus::ConsensusEngine;
//! use stakechain_core::{Address, ChainParams, Hash};
//!
//! let engine = ConsensusEngine::new(ChainParams::default());
//! let validators = vec![(Address([1; 20]), 30), (Address([2; 20]), 70)];
//! let producer = ConsensusEngine::select_producer(&Hash::ZERO, 1, &validators);
//! assert!(producer.is_some());
//! assert_eq!(engine.scheduled_reward(1), 50_000_000);
//! ```

pub mod engine;
pub mod validator;

pub use engine::{ConsensusEngine, ConsensusError, SlashRecord};
pub use validator::{
    apply_block_tail, check_timestamp_window, BlockRejection, BlockValidator, ChainTip,
    RejectionKind, TransactionValidator, ValidatedBlock, ValidationError,
};

//! Core ledger primitives for stakechain.
//!
//! This crate provides the types every other layer shares:
//! - Hashing, Ed25519 keys and addresses
//! - Protocol parameters and amount formatting
//! - Accounts, transactions, blocks and misbehaviour evidence
//! - The contract-executor capability

pub mod account;
pub mod amount;
pub mod block;
pub mod contract;
pub mod crypto;
pub mod evidence;
pub mod hash;
pub mod merkle;
pub mod params;
pub mod transaction;

pub use account::{Account, Unbonding};
pub use amount::{format_amount, parse_amount, AmountError};
pub use block::{Block, BlockDefect, BlockHeader, SignedHeader};
pub use contract::{
    ContractCall, ContractExecutor, ContractOutcome, ContractStorage, NullExecutor, Slot,
};
pub use crypto::{Address, CryptoError, Keypair, PublicKey, Signature};
pub use evidence::{Evidence, EvidenceError};
pub use hash::{hash, hash_concat, hash_encoded, Hash, H256, HASH_ALGORITHM};
pub use merkle::merkle_root;
pub use params::{ChainParams, COIN};
pub use transaction::{Transaction, TransactionError, TxKind};

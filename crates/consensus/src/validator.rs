//! Transaction and block validation rules.
//!
//! [`BlockValidator::validate`] runs the checks in a fixed order and stops at
//! the first failure, so every rejected block carries exactly one reason.

use crate::engine::{ConsensusEngine, ConsensusError, SlashRecord};
use stakechain_core::{
    Address, Block, BlockDefect, ContractExecutor, Hash, Transaction, TransactionError,
};
use stakechain_storage::{
    BatchOp, BatchSummary, BlockContext, ChainMetadata, Ledger, LedgerBatch, LedgerError,
    StateDelta, StorageError,
};
use thiserror::Error;
use tracing::debug;

/// How a rejection is classified for operators and peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Malformed or invalid content; dropped, processing continues.
    Validation,
    /// Misbehaviour by the producer.
    ConsensusViolation,
}

/// Why a candidate block was not committed.
#[derive(Debug, Error)]
pub enum BlockRejection {
    #[error("block height mismatch (expected {expected}, got {got})")]
    WrongHeight { expected: u64, got: u64 },

    #[error("previous hash {got} does not match tip {expected}")]
    WrongParent { expected: Hash, got: Hash },

    #[error("timestamp {timestamp} is not after parent timestamp {parent}")]
    TimestampNotIncreasing { timestamp: u64, parent: u64 },

    #[error("timestamp {timestamp} is more than {drift}s ahead of local time {now}")]
    TimestampTooFuture { timestamp: u64, now: u64, drift: u64 },

    #[error("no eligible validator for height {0}")]
    NoEligibleProducer(u64),

    #[error("producer {got} is not the selected producer {expected}")]
    WrongProducer { expected: Address, got: Address },

    #[error("producer {0} has nothing staked")]
    ProducerNotStaked(Address),

    #[error("producer {0} has no recorded public key")]
    UnknownProducerKey(Address),

    #[error("invalid producer signature")]
    BadSignature,

    #[error("malformed block: {0}")]
    Malformed(#[from] BlockDefect),

    #[error("too many transactions ({count} > {max})")]
    TooManyTransactions { count: usize, max: usize },

    #[error("transaction {index} ({tx}) rejected: {source}")]
    Transaction {
        index: usize,
        tx: Hash,
        #[source]
        source: LedgerError,
    },

    #[error("evidence {index} rejected: {source}")]
    Evidence {
        index: usize,
        #[source]
        source: ConsensusError,
    },

    #[error("fee or reward credit failed: {0}")]
    Reward(#[source] LedgerError),

    #[error("state root mismatch (declared {declared}, computed {computed})")]
    StateRootMismatch { declared: Hash, computed: Hash },
}

impl BlockRejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            BlockRejection::WrongProducer { .. }
            | BlockRejection::UnknownProducerKey(_)
            | BlockRejection::BadSignature
            | BlockRejection::Malformed(_) => RejectionKind::ConsensusViolation,
            _ => RejectionKind::Validation,
        }
    }

    /// Stable reason tag for adapters.
    pub fn code(&self) -> &'static str {
        match self {
            BlockRejection::WrongHeight { .. } => "wrong_height",
            BlockRejection::WrongParent { .. } => "wrong_parent",
            BlockRejection::TimestampNotIncreasing { .. } => "timestamp_not_increasing",
            BlockRejection::TimestampTooFuture { .. } => "timestamp_too_future",
            BlockRejection::NoEligibleProducer(_) => "no_eligible_producer",
            BlockRejection::WrongProducer { .. } => "wrong_producer",
            BlockRejection::ProducerNotStaked(_) => "producer_not_staked",
            BlockRejection::UnknownProducerKey(_) => "unknown_producer_key",
            BlockRejection::BadSignature => "bad_signature",
            BlockRejection::Malformed(_) => "malformed_block",
            BlockRejection::TooManyTransactions { .. } => "too_many_transactions",
            BlockRejection::Transaction { .. } => "invalid_transaction",
            BlockRejection::Evidence { .. } => "invalid_evidence",
            BlockRejection::Reward(_) => "reward_failed",
            BlockRejection::StateRootMismatch { .. } => "state_root_mismatch",
        }
    }
}

/// Errors that can occur during validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("block rejected: {0}")]
    Rejected(#[from] BlockRejection),

    #[error("storage failure during validation: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// A block timestamp must be strictly after its parent's and at most `drift`
/// seconds ahead of `now`.
pub fn check_timestamp_window(
    timestamp: u64,
    parent: u64,
    now: u64,
    drift: u64,
) -> std::result::Result<(), BlockRejection> {
    if timestamp <= parent {
        return Err(BlockRejection::TimestampNotIncreasing { timestamp, parent });
    }
    if timestamp > now.saturating_add(drift) {
        return Err(BlockRejection::TimestampTooFuture {
            timestamp,
            now,
            drift,
        });
    }
    Ok(())
}

/// Split a ledger error into a storage failure or a rule violation.
fn rule_violation(err: LedgerError) -> std::result::Result<LedgerError, StorageError> {
    match err {
        LedgerError::Storage(e) => Err(e),
        other => Ok(other),
    }
}

fn consensus_violation(err: ConsensusError) -> std::result::Result<ConsensusError, StorageError> {
    match err {
        ConsensusError::Ledger(LedgerError::Storage(e)) => Err(e),
        other => Ok(other),
    }
}

/// Transaction validator.
pub struct TransactionValidator;

impl TransactionValidator {
    /// Checks that need no ledger state: key binding, signature and shape.
    pub fn validate_stateless(tx: &Transaction) -> std::result::Result<(), TransactionError> {
        tx.verify()?;
        tx.check_shape()
    }
}

/// The committed tip a candidate must extend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub height: u64,
    pub hash: Hash,
    pub timestamp: u64,
    pub cumulative_supply: u64,
}

impl ChainTip {
    pub fn new(metadata: &ChainMetadata, tip_timestamp: u64) -> Self {
        Self {
            height: metadata.height,
            hash: metadata.tip_hash,
            timestamp: tip_timestamp,
            cumulative_supply: metadata.cumulative_supply,
        }
    }
}

/// A block that passed every check, with everything needed to commit it.
#[derive(Debug)]
pub struct ValidatedBlock {
    pub block: Block,
    pub deltas: Vec<StateDelta>,
    pub slashes: Vec<SlashRecord>,
    pub reward: u64,
    pub summary: BatchSummary,
    /// Metadata record to write with the block.
    pub metadata: ChainMetadata,
    /// Ledger writes to commit with the block.
    pub ops: Vec<BatchOp>,
}

/// Applies the parts of a block that follow its transactions: evidence, then
/// fees and reward. Shared with block assembly so both paths agree.
pub fn apply_block_tail(
    engine: &ConsensusEngine,
    batch: &mut LedgerBatch<'_>,
    block: &Block,
) -> Result<(Vec<SlashRecord>, u64)> {
    let mut slashes = Vec::with_capacity(block.evidence.len());
    for (index, evidence) in block.evidence.iter().enumerate() {
        match engine.apply_evidence(batch, evidence) {
            Ok(record) => slashes.push(record),
            Err(err) => {
                let source = consensus_violation(err)?;
                return Err(BlockRejection::Evidence { index, source }.into());
            }
        }
    }

    let reward = match engine.apply_reward(batch) {
        Ok(reward) => reward,
        Err(err) => return Err(BlockRejection::Reward(rule_violation(err)?).into()),
    };
    Ok((slashes, reward))
}

/// Block validator.
pub struct BlockValidator<'a> {
    ledger: &'a Ledger,
    engine: &'a ConsensusEngine,
    executor: &'a dyn ContractExecutor,
}

impl<'a> BlockValidator<'a> {
    pub fn new(
        ledger: &'a Ledger,
        engine: &'a ConsensusEngine,
        executor: &'a dyn ContractExecutor,
    ) -> Self {
        Self {
            ledger,
            engine,
            executor,
        }
    }

    /// (1) height and (2) parent link.
    pub fn check_extends(block: &Block, tip: &ChainTip) -> std::result::Result<(), BlockRejection> {
        let expected = tip.height + 1;
        if block.header.height != expected {
            return Err(BlockRejection::WrongHeight {
                expected,
                got: block.header.height,
            });
        }
        if block.header.prev_hash != tip.hash {
            return Err(BlockRejection::WrongParent {
                expected: tip.hash,
                got: block.header.prev_hash,
            });
        }
        Ok(())
    }

    /// (3) strictly after the parent and not too far ahead of `now`.
    pub fn check_timestamp(
        &self,
        block: &Block,
        tip: &ChainTip,
        now: u64,
    ) -> std::result::Result<(), BlockRejection> {
        let drift = self.engine.params().max_clock_drift_secs;
        check_timestamp_window(block.header.timestamp, tip.timestamp, now, drift)
    }

    /// (4) selected producer and (5) its signature.
    pub fn check_producer(&self, block: &Block, tip: &ChainTip) -> Result<()> {
        let height = block.header.height;
        let expected = self
            .engine
            .producer_for_height(self.ledger, &tip.hash, height)?
            .ok_or(BlockRejection::NoEligibleProducer(height))?;
        if block.header.producer != expected {
            return Err(BlockRejection::WrongProducer {
                expected,
                got: block.header.producer,
            }
            .into());
        }

        let key = self
            .ledger
            .get_account(&expected)?
            .public_key
            .ok_or(BlockRejection::UnknownProducerKey(expected))?;
        if !block.verify_signature(&key) {
            return Err(BlockRejection::BadSignature.into());
        }
        Ok(())
    }

    /// Run every check against the committed tip and re-execute the block.
    pub fn validate(&self, block: &Block, tip: &ChainTip, now: u64) -> Result<ValidatedBlock> {
        Self::check_extends(block, tip)?;
        self.check_timestamp(block, tip, now)?;
        self.check_producer(block, tip)?;

        // (6) body integrity, then sequential application.
        if let Some(defect) = block.structural_defect() {
            return Err(BlockRejection::Malformed(defect).into());
        }
        let max = self.engine.params().max_txs_per_block;
        if block.transactions.len() > max {
            return Err(BlockRejection::TooManyTransactions {
                count: block.transactions.len(),
                max,
            }
            .into());
        }

        let ctx = BlockContext {
            height: block.header.height,
            timestamp: block.header.timestamp,
            producer: block.header.producer,
        };
        let mut batch = self.ledger.batch(ctx, tip.cumulative_supply);
        batch.settle().map_err(storage_or_internal)?;

        let deltas = match batch.apply_block_batch(&block.transactions, self.executor) {
            Ok(deltas) => deltas,
            Err(failure) => {
                let source = rule_violation(failure.error)?;
                return Err(BlockRejection::Transaction {
                    index: failure.index,
                    tx: failure.tx,
                    source,
                }
                .into());
            }
        };
        let (slashes, reward) = apply_block_tail(self.engine, &mut batch, block)?;

        // (7) state commitment.
        let computed = batch.state_root().map_err(storage_or_internal)?;
        if computed != block.header.state_root {
            return Err(BlockRejection::StateRootMismatch {
                declared: block.header.state_root,
                computed,
            }
            .into());
        }

        let cumulative_supply = batch.cumulative_supply();
        let (ops, summary) = batch.into_ops().map_err(storage_or_internal)?;
        let metadata = ChainMetadata {
            height: ctx.height,
            tip_hash: block.hash(),
            cumulative_supply,
            era: self.engine.params().era(ctx.height),
        };
        debug!(height = ctx.height, txs = deltas.len(), reward, "block validated");

        Ok(ValidatedBlock {
            block: block.clone(),
            deltas,
            slashes,
            reward,
            summary,
            metadata,
            ops,
        })
    }
}

/// Settle, state root and op encoding only fail on storage or encoding errors.
fn storage_or_internal(err: LedgerError) -> ValidationError {
    match err {
        LedgerError::Storage(e) => ValidationError::Storage(e),
        other => ValidationError::Storage(StorageError::Corrupt(other.to_string())),
    }
}

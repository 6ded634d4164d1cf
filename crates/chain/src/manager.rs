//! Chain orchestration.
//!
//! [`ChainManager`] owns the canonical tip and is the only component that
//! mutates ledger state. It is not internally synchronized: exactly one
//! owner (the [`Node`](crate::Node) task, or a test) drives it, so block
//! validation and application never interleave.

use crate::events::{ChainEvent, EventSink, NullSink};
use crate::genesis::GenesisConfig;
use crate::pool::{PoolConfig, PoolError, TransactionPool};
use crate::reader::{BlockId, ChainInfo, ChainReader};
use stakechain_consensus::{
    apply_block_tail, check_timestamp_window, BlockRejection, BlockValidator, ChainTip,
    ConsensusEngine, ConsensusError, ValidatedBlock, ValidationError,
};
use stakechain_core::{
    Account, Address, Block, BlockHeader, ChainParams, ContractExecutor, Evidence, Hash, Keypair,
    NullExecutor, Transaction,
};
use stakechain_storage::{BlockContext, BlockStore, Ledger, LedgerError, Storage, StorageError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Rejections remembered for [`ChainManager::block_status`].
const REJECTED_MEMORY: usize = 1_024;

/// Orphans kept per height and overall; the oldest go first.
const MAX_ORPHANS_PER_HEIGHT: usize = 4;
const MAX_ORPHANS: usize = 256;

/// Errors that can occur during chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction rejected: {0}")]
    Transaction(#[from] PoolError),

    #[error("block rejected: {0}")]
    Block(#[from] BlockRejection),

    #[error("evidence rejected: {0}")]
    Evidence(#[from] ConsensusError),

    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    #[error("chain is not initialized")]
    NotInitialized,

    #[error("chain is already initialized")]
    AlreadyInitialized,

    #[error("stored chain parameters differ from the configured ones")]
    ParamsMismatch,

    #[error("height {height} is final (finalized height {finalized})")]
    Finalized { height: u64, finalized: u64 },

    #[error("node halted: {0}")]
    Halted(String),
}

impl ChainError {
    /// Storage failures stop the writer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::Storage(_) | ChainError::Halted(_))
    }

    /// Stable reason tag for adapters.
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::Storage(_) => "storage_failure",
            ChainError::Transaction(e) => e.code(),
            ChainError::Block(e) => e.code(),
            ChainError::Evidence(e) => e.code(),
            ChainError::InvalidGenesis(_) => "invalid_genesis",
            ChainError::NotInitialized => "not_initialized",
            ChainError::AlreadyInitialized => "already_initialized",
            ChainError::ParamsMismatch => "params_mismatch",
            ChainError::Finalized { .. } => "finalized_height",
            ChainError::Halted(_) => "halted",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// Chain configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub params: ChainParams,
    pub pool: PoolConfig,
    /// Produce blocks with no transactions or evidence.
    pub produce_empty_blocks: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            params: ChainParams::default(),
            pool: PoolConfig::default(),
            produce_empty_blocks: true,
        }
    }
}

/// Where a block stands from this node's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Committed,
    /// At least `confirmation_depth` blocks on top.
    Finalized,
    /// Valid-looking block at an already committed height; never applied.
    Orphaned,
    Rejected(&'static str),
}

/// Result of handing a block to [`ChainManager::receive_block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Committed(Hash),
    /// Already part of the canonical chain; nothing changed.
    AlreadyCommitted,
    /// Kept as an orphan. `evidence` is set when it proved equivocation.
    Orphaned { evidence: bool },
}

/// Main chain struct that orchestrates all components.
pub struct ChainManager {
    blocks: BlockStore,
    ledger: Ledger,
    engine: ConsensusEngine,
    executor: Arc<dyn ContractExecutor>,
    keypair: Option<Keypair>,
    pool: TransactionPool,
    produce_empty_blocks: bool,
    tip: ChainTip,
    /// Orphans by hash, with the height index used for pruning and the
    /// arrival order used for eviction.
    orphans: HashMap<Hash, Block>,
    orphan_heights: BTreeMap<u64, Vec<Hash>>,
    orphan_order: VecDeque<Hash>,
    rejected: HashMap<Hash, &'static str>,
    rejected_order: VecDeque<Hash>,
    /// Verified evidence waiting for inclusion, one per offence.
    evidence: BTreeMap<(Address, u64), Evidence>,
    events: Arc<dyn EventSink>,
    reader: ChainReader,
    halted: Option<String>,
}

impl ChainManager {
    /// Write block 0 into an empty store. Returns the genesis hash.
    pub fn init_genesis(
        storage: &Storage,
        params: &ChainParams,
        genesis: &GenesisConfig,
    ) -> Result<Hash> {
        let blocks = BlockStore::new(storage.clone());
        if blocks.is_initialized()? {
            return Err(ChainError::AlreadyInitialized);
        }
        genesis.check(params).map_err(ChainError::InvalidGenesis)?;

        let ledger = Ledger::new(storage.clone(), params.clone());
        let built = genesis.build(&ledger).map_err(|e| match e {
            LedgerError::Storage(e) => ChainError::Storage(e),
            other => ChainError::InvalidGenesis(other.to_string()),
        })?;
        blocks.init_genesis(&built.block, params, &built.metadata, built.ops)?;
        info!(
            hash = %built.metadata.tip_hash,
            supply = built.metadata.cumulative_supply,
            validators = genesis.validators.len(),
            "genesis committed"
        );
        Ok(built.metadata.tip_hash)
    }

    /// Open an initialized store, discarding any partially written block.
    ///
    /// `keypair` is this node's producer key; without one the node only
    /// follows the chain.
    pub fn open(storage: Storage, config: ChainConfig, keypair: Option<Keypair>) -> Result<Self> {
        let blocks = BlockStore::new(storage.clone());
        match blocks.get_params()? {
            None => return Err(ChainError::NotInitialized),
            Some(stored) if stored != config.params => return Err(ChainError::ParamsMismatch),
            Some(_) => {}
        }
        let recovery = blocks.recover()?.ok_or(ChainError::NotInitialized)?;
        if !recovery.discarded.is_empty() {
            info!(discarded = recovery.discarded.len(), "recovered from partial write");
        }
        let metadata = recovery.metadata;
        let tip_block = blocks
            .get_block_by_height(metadata.height)?
            .ok_or_else(|| StorageError::Corrupt(format!("tip block {} missing", metadata.height)))?;

        let ledger = Ledger::new(storage, config.params.clone());
        let tip = ChainTip::new(&metadata, tip_block.header.timestamp);
        let reader = ChainReader::new(ChainInfo::default(), blocks.clone(), ledger.clone());
        let manager = Self {
            blocks,
            ledger,
            engine: ConsensusEngine::new(config.params),
            executor: Arc::new(NullExecutor),
            keypair,
            pool: TransactionPool::new(config.pool),
            produce_empty_blocks: config.produce_empty_blocks,
            tip,
            orphans: HashMap::new(),
            orphan_heights: BTreeMap::new(),
            orphan_order: VecDeque::new(),
            rejected: HashMap::new(),
            rejected_order: VecDeque::new(),
            evidence: BTreeMap::new(),
            events: Arc::new(NullSink),
            reader,
            halted: None,
        };
        manager.reader.publish(manager.get_chain_info()?);
        info!(
            height = manager.tip.height,
            hash = %manager.tip.hash,
            producer = ?manager.keypair.as_ref().map(|k| k.address()),
            "chain opened"
        );
        Ok(manager)
    }

    pub fn with_executor(mut self, executor: Arc<dyn ContractExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn params(&self) -> &ChainParams {
        self.engine.params()
    }

    pub fn tip(&self) -> &ChainTip {
        &self.tip
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn reader(&self) -> ChainReader {
        self.reader.clone()
    }

    pub fn producer_address(&self) -> Option<Address> {
        self.keypair.as_ref().map(|k| k.address())
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Why the manager stopped accepting work, if it has.
    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Highest height that can no longer be replaced.
    pub fn finalized_height(&self) -> u64 {
        self.tip
            .height
            .saturating_sub(self.engine.params().confirmation_depth)
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(ChainError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Stop accepting mutations after a storage failure.
    fn halt(&mut self, err: StorageError) -> ChainError {
        error!(error = %err, height = self.tip.height, "storage failure, halting");
        self.halted = Some(err.to_string());
        ChainError::Storage(err)
    }

    /// Route storage failures through [`halt`](Self::halt).
    fn check_fatal<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Err(ChainError::Storage(e)) => Err(self.halt(e)),
            Err(ChainError::Transaction(PoolError::Storage(e))) => Err(self.halt(e)),
            other => other,
        }
    }

    /// Admit a transaction to the pool. The published [`ChainInfo`] catches up
    /// at the next commit.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<Hash> {
        self.ensure_running()?;
        let result = self
            .pool
            .add(tx, &self.ledger, self.tip.height + 1)
            .map_err(ChainError::from);
        let tx_hash = self.check_fatal(result)?;
        self.events.emit(ChainEvent::TransactionAdmitted(tx_hash));
        Ok(tx_hash)
    }

    /// Verify misbehaviour evidence and queue it for the next produced block.
    pub fn submit_evidence(&mut self, evidence: Evidence) -> Result<()> {
        self.ensure_running()?;
        let ctx = self.next_context(Address::ZERO, 0);
        let batch = self.ledger.batch(ctx, self.tip.cumulative_supply);
        let result = match self.engine.verify_evidence(&batch, &evidence) {
            Ok(offender) => Ok(offender),
            Err(ConsensusError::Ledger(LedgerError::Storage(e))) => Err(ChainError::Storage(e)),
            Err(e) => Err(ChainError::Evidence(e)),
        };
        drop(batch);
        let offender = self.check_fatal(result)?;

        let key = (offender, evidence.height());
        if !self.evidence.contains_key(&key) {
            info!(%offender, offence_height = evidence.height(), "evidence queued");
            self.evidence.insert(key, evidence);
        }
        Ok(())
    }

    fn next_context(&self, producer: Address, timestamp: u64) -> BlockContext {
        BlockContext {
            height: self.tip.height + 1,
            timestamp,
            producer,
        }
    }

    /// Produce the block at `height` if this node is its selected producer.
    pub fn produce_block_if_selected(&mut self, height: u64) -> Result<Option<Block>> {
        self.produce_block_at(height, BlockHeader::current_timestamp())
    }

    /// [`produce_block_if_selected`](Self::produce_block_if_selected) with an
    /// explicit clock.
    pub fn produce_block_at(&mut self, height: u64, now: u64) -> Result<Option<Block>> {
        self.ensure_running()?;
        if height != self.tip.height + 1 {
            debug!(height, tip = self.tip.height, "not the next height, skipping");
            return Ok(None);
        }
        let Some(me) = self.producer_address() else {
            return Ok(None);
        };
        let selected = self
            .engine
            .producer_for_height(&self.ledger, &self.tip.hash, height)
            .map_err(ChainError::from);
        match self.check_fatal(selected)? {
            Some(producer) if producer == me => {}
            selected => {
                debug!(height, selected = ?selected, "not selected");
                return Ok(None);
            }
        }

        if now <= self.tip.timestamp {
            debug!(height, now, parent = self.tip.timestamp, "clock not past parent, skipping");
            return Ok(None);
        }
        let assembled = self.assemble(height, me, now);
        let Some(block) = self.check_fatal(assembled)? else {
            debug!(height, "nothing to include, skipping empty block");
            return Ok(None);
        };

        let validated = self.validate(&block, now);
        let validated = self.check_fatal(validated)?;
        self.commit(validated)?;
        Ok(Some(block))
    }

    /// Build and sign a block from the pool and queued evidence.
    fn assemble(&self, height: u64, producer: Address, timestamp: u64) -> Result<Option<Block>> {
        let Some(keypair) = &self.keypair else {
            return Ok(None);
        };
        let ctx = BlockContext {
            height,
            timestamp,
            producer,
        };
        let max = self.engine.params().max_txs_per_block;
        let mut batch = self.ledger.batch(ctx, self.tip.cumulative_supply);
        batch.settle().map_err(ledger_failure)?;

        let mut transactions = Vec::new();
        for tx in self.pool.select(&self.ledger, max)? {
            match batch.apply(&tx, self.executor.as_ref()) {
                Ok(_) => transactions.push(tx),
                Err(LedgerError::Storage(e)) => return Err(ChainError::Storage(e)),
                // Follows a skipped predecessor; may still apply later.
                Err(reason @ LedgerError::InvalidNonce { .. }) => {
                    debug!(hash = %tx.hash(), reason = %reason, "skipping transaction");
                }
                Err(reason) => {
                    debug!(hash = %tx.hash(), reason = %reason, "evicting transaction");
                    self.pool.remove(&tx.hash());
                }
            }
        }

        let mut evidence = Vec::new();
        for item in self.evidence.values() {
            match self.engine.verify_evidence(&batch, item) {
                Ok(_) => evidence.push(item.clone()),
                Err(ConsensusError::Ledger(LedgerError::Storage(e))) => {
                    return Err(ChainError::Storage(e))
                }
                Err(reason) => debug!(reason = %reason, "skipping evidence"),
            }
        }

        if transactions.is_empty() && evidence.is_empty() && !self.produce_empty_blocks {
            return Ok(None);
        }

        let prev_hash = self.tip.hash;
        let draft = Block::new(
            height,
            prev_hash,
            timestamp,
            producer,
            transactions,
            evidence,
            Hash::ZERO,
        );
        match apply_block_tail(&self.engine, &mut batch, &draft) {
            Ok(_) => {}
            Err(ValidationError::Storage(e)) => return Err(ChainError::Storage(e)),
            Err(ValidationError::Rejected(r)) => return Err(ChainError::Block(r)),
        }
        let state_root = batch.state_root().map_err(ledger_failure)?;
        drop(batch);

        let Block {
            transactions,
            evidence,
            ..
        } = draft;
        let block = Block::new(
            height,
            prev_hash,
            timestamp,
            producer,
            transactions,
            evidence,
            state_root,
        )
        .signed(keypair);
        Ok(Some(block))
    }

    fn validate(&self, block: &Block, now: u64) -> Result<ValidatedBlock> {
        let validator = BlockValidator::new(&self.ledger, &self.engine, self.executor.as_ref());
        validator.validate(block, &self.tip, now).map_err(|e| match e {
            ValidationError::Rejected(r) => ChainError::Block(r),
            ValidationError::Storage(e) => ChainError::Storage(e),
        })
    }

    /// Persist a validated block and move the tip.
    fn commit(&mut self, validated: ValidatedBlock) -> Result<()> {
        let ValidatedBlock {
            block,
            deltas,
            slashes,
            reward,
            metadata,
            ops,
            ..
        } = validated;
        if let Err(e) = self.blocks.commit_block(&block, &metadata, ops) {
            return Err(self.halt(e));
        }

        self.tip = ChainTip::new(&metadata, block.header.timestamp);
        for slash in &slashes {
            self.evidence.remove(&(slash.offender, slash.offence_height));
        }
        let included: Vec<Hash> = deltas.iter().map(|d| d.tx_hash).collect();
        let evicted = self
            .pool
            .on_block_committed(&included, &self.ledger, self.tip.height + 1)
            .map_err(ChainError::from);
        let evicted = self.check_fatal(evicted)?;
        self.prune_orphans();

        info!(
            height = metadata.height,
            hash = %metadata.tip_hash,
            producer = %block.header.producer,
            txs = deltas.len(),
            reward,
            evicted = evicted.len(),
            "block committed"
        );
        self.publish_info()?;
        for slash in slashes {
            self.events.emit(ChainEvent::ValidatorSlashed {
                address: slash.offender,
                height: slash.offence_height,
            });
        }
        self.events.emit(ChainEvent::BlockCommitted(block));
        Ok(())
    }

    /// Handle a block from the network.
    pub fn receive_block(&mut self, block: Block) -> Result<ReceiveOutcome> {
        self.receive_block_at(block, BlockHeader::current_timestamp())
    }

    /// [`receive_block`](Self::receive_block) with an explicit clock.
    pub fn receive_block_at(&mut self, block: Block, now: u64) -> Result<ReceiveOutcome> {
        self.ensure_running()?;
        let hash = block.hash();
        let height = block.header.height;

        if height <= self.tip.height {
            return self.receive_committed_height(block, hash, now);
        }

        match self.validate(&block, now) {
            Ok(validated) => {
                self.commit(validated)?;
                Ok(ReceiveOutcome::Committed(hash))
            }
            Err(ChainError::Block(rejection)) => {
                warn!(
                    height,
                    hash = %hash,
                    reason = rejection.code(),
                    "block rejected"
                );
                match &rejection {
                    // The header hash also names the genuine block, which may
                    // still arrive intact.
                    BlockRejection::Malformed(defect) if !defect.is_attributable() => {}
                    // Checked after producer and signature, and the body
                    // matches the signed roots: the producer built this.
                    BlockRejection::Malformed(_) => {
                        self.remember_rejection(hash, rejection.code());
                        let evidence = Evidence::invalid_block(block);
                        self.evidence
                            .entry((evidence.offender(), height))
                            .or_insert(evidence);
                    }
                    _ => self.remember_rejection(hash, rejection.code()),
                }
                Err(ChainError::Block(rejection))
            }
            Err(other) => self.check_fatal(Err(other)),
        }
    }

    /// A block at or below the tip: duplicate, equivocation or competing fork.
    fn receive_committed_height(
        &mut self,
        block: Block,
        hash: Hash,
        now: u64,
    ) -> Result<ReceiveOutcome> {
        let height = block.header.height;
        let committed = self.blocks.get_block_by_height(height);
        let committed = self.check_fatal(committed.map_err(ChainError::from))?;
        let Some(committed) = committed else {
            return Err(self.halt(StorageError::Corrupt(format!("block {height} missing"))));
        };
        if committed.hash() == hash {
            debug!(height, hash = %hash, "block already committed");
            return Ok(ReceiveOutcome::AlreadyCommitted);
        }
        if self.orphans.contains_key(&hash) {
            return Ok(ReceiveOutcome::Orphaned { evidence: false });
        }

        let finalized = self.finalized_height();
        if height <= finalized {
            self.remember_rejection(hash, "finalized_height");
            return Err(ChainError::Finalized { height, finalized });
        }
        if block.header.prev_hash != committed.header.prev_hash {
            let rejection = BlockRejection::WrongParent {
                expected: committed.header.prev_hash,
                got: block.header.prev_hash,
            };
            self.remember_rejection(hash, rejection.code());
            return Err(rejection.into());
        }

        let parent = self.blocks.get_block_by_height(height - 1);
        let Some(parent) = self.check_fatal(parent.map_err(ChainError::from))? else {
            return Err(self.halt(StorageError::Corrupt(format!("block {} missing", height - 1))));
        };
        let drift = self.engine.params().max_clock_drift_secs;
        if let Err(rejection) =
            check_timestamp_window(block.header.timestamp, parent.header.timestamp, now, drift)
        {
            self.remember_rejection(hash, rejection.code());
            return Err(rejection.into());
        }

        let producer = self.get_account(&block.header.producer);
        let producer = self.check_fatal(producer)?;
        if producer.staked == 0 {
            let rejection = BlockRejection::ProducerNotStaked(block.header.producer);
            self.remember_rejection(hash, rejection.code());
            return Err(rejection.into());
        }
        let Some(key) = producer.public_key else {
            let rejection = BlockRejection::UnknownProducerKey(block.header.producer);
            self.remember_rejection(hash, rejection.code());
            return Err(rejection.into());
        };
        if !block.verify_signature(&key) {
            self.remember_rejection(hash, BlockRejection::BadSignature.code());
            return Err(BlockRejection::BadSignature.into());
        }

        let equivocation = block.header.producer == committed.header.producer;
        if equivocation {
            let evidence = Evidence::equivocation(committed.signed_header(), block.signed_header());
            warn!(
                producer = %block.header.producer,
                height,
                "equivocation detected"
            );
            self.evidence
                .entry((block.header.producer, height))
                .or_insert(evidence);
        }
        info!(height, hash = %hash, "block kept as orphan");
        self.keep_orphan(hash, block);
        Ok(ReceiveOutcome::Orphaned {
            evidence: equivocation,
        })
    }

    fn keep_orphan(&mut self, hash: Hash, block: Block) {
        let height = block.header.height;
        let at_height = self.orphan_heights.get(&height).map_or(0, Vec::len);
        if at_height >= MAX_ORPHANS_PER_HEIGHT {
            if let Some(oldest) = self.orphan_heights.get(&height).and_then(|h| h.first().copied()) {
                self.drop_orphan(&oldest);
            }
        }
        if self.orphans.len() >= MAX_ORPHANS {
            if let Some(oldest) = self.orphan_order.front().copied() {
                self.drop_orphan(&oldest);
            }
        }
        self.orphan_heights.entry(height).or_default().push(hash);
        self.orphan_order.push_back(hash);
        self.orphans.insert(hash, block);
    }

    fn drop_orphan(&mut self, hash: &Hash) {
        let Some(block) = self.orphans.remove(hash) else {
            return;
        };
        debug!(height = block.header.height, hash = %hash, "orphan dropped");
        if let Some(hashes) = self.orphan_heights.get_mut(&block.header.height) {
            hashes.retain(|h| h != hash);
            if hashes.is_empty() {
                self.orphan_heights.remove(&block.header.height);
            }
        }
        self.orphan_order.retain(|h| h != hash);
    }

    fn remember_rejection(&mut self, hash: Hash, code: &'static str) {
        if self.rejected.insert(hash, code).is_none() {
            self.rejected_order.push_back(hash);
        }
        while self.rejected_order.len() > REJECTED_MEMORY {
            if let Some(old) = self.rejected_order.pop_front() {
                self.rejected.remove(&old);
            }
        }
    }

    /// Orphans at final heights can never matter again.
    fn prune_orphans(&mut self) {
        let finalized = self.finalized_height();
        let keep = self.orphan_heights.split_off(&(finalized + 1));
        for hash in std::mem::replace(&mut self.orphan_heights, keep)
            .into_values()
            .flatten()
        {
            self.orphans.remove(&hash);
        }
        let orphans = &self.orphans;
        self.orphan_order.retain(|h| orphans.contains_key(h));
    }

    pub fn get_chain_info(&self) -> Result<ChainInfo> {
        let next = self.tip.height + 1;
        let active_validators = self.ledger.eligible_validators(next)?.len();
        let (pending, queued) = self.pool.ready_and_queued(&self.ledger)?;
        Ok(ChainInfo {
            height: self.tip.height,
            tip_hash: self.tip.hash,
            tip_timestamp: self.tip.timestamp,
            cumulative_supply: self.tip.cumulative_supply,
            era: self.engine.params().era(self.tip.height),
            current_reward: self
                .engine
                .block_reward(next, self.tip.cumulative_supply),
            finalized_height: self.finalized_height(),
            active_validators,
            pending_transactions: pending,
            queued_transactions: queued,
        })
    }

    fn publish_info(&mut self) -> Result<()> {
        let info = self.get_chain_info();
        let info = self.check_fatal(info)?;
        self.reader.publish(info);
        Ok(())
    }

    pub fn get_block(&self, id: BlockId) -> Result<Option<Block>> {
        Ok(self.reader.get_block(id)?)
    }

    /// Recent orphan by hash.
    pub fn get_orphan(&self, hash: &Hash) -> Option<&Block> {
        self.orphans.get(hash)
    }

    pub fn get_account(&self, address: &Address) -> Result<Account> {
        Ok(self.ledger.get_account(address)?)
    }

    pub fn block_status(&self, hash: &Hash) -> Result<Option<BlockStatus>> {
        if let Some(height) = self.blocks.height_of(hash)? {
            let status = if height <= self.finalized_height() {
                BlockStatus::Finalized
            } else {
                BlockStatus::Committed
            };
            return Ok(Some(status));
        }
        if self.orphans.contains_key(hash) {
            return Ok(Some(BlockStatus::Orphaned));
        }
        Ok(self.rejected.get(hash).copied().map(BlockStatus::Rejected))
    }

    /// Evidence waiting for inclusion.
    pub fn pending_evidence(&self) -> usize {
        self.evidence.len()
    }

    pub fn flush(&self) -> Result<()> {
        self.blocks.flush()?;
        Ok(())
    }
}

fn ledger_failure(err: LedgerError) -> ChainError {
    match err {
        LedgerError::Storage(e) => ChainError::Storage(e),
        other => ChainError::Storage(StorageError::Corrupt(other.to_string())),
    }
}

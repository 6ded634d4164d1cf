//! Transaction pool for pending transactions.
//!
//! The pool stores validated transactions waiting to be included in a block.
//! Admission checks each transaction against the committed ledger on its own;
//! it never simulates the effects of other pending transactions. A transaction
//! with a future nonce is queued until its predecessors commit.

use parking_lot::RwLock;
use stakechain_consensus::TransactionValidator;
use stakechain_core::{Address, Hash, Transaction, TransactionError, TxKind};
use stakechain_storage::{Ledger, StorageError};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid transaction: {0}")]
    Invalid(#[from] TransactionError),

    #[error("transaction already in pool")]
    Duplicate,

    #[error("nonce too low (expected at least {expected}, got {got})")]
    NonceTooLow { expected: u64, got: u64 },

    #[error("nonce {got} too far ahead of {next} (max queue depth {depth})")]
    NonceTooFar { next: u64, got: u64, depth: usize },

    #[error("another transaction with nonce {0} is already pending")]
    NonceAlreadyPending(u64),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("sender has no stake to unstake")]
    UnknownSenderForUnstake,

    #[error("insufficient stake: staked {staked}, requested {requested}")]
    InsufficientStake { staked: u64, requested: u64 },

    #[error("{0} is not a contract")]
    NotAContract(Address),

    #[error("contract {0} already exists")]
    ContractExists(Address),

    #[error("balance of recipient {0} would overflow")]
    RecipientOverflow(Address),

    #[error("pool is full (capacity: {0})")]
    PoolFull(usize),

    #[error("sender queue is full (depth: {0})")]
    SenderQueueFull(usize),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl PoolError {
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::Invalid(_) => "invalid_transaction",
            PoolError::Duplicate => "duplicate",
            PoolError::NonceTooLow { .. } => "nonce_too_low",
            PoolError::NonceTooFar { .. } => "nonce_too_far",
            PoolError::NonceAlreadyPending(_) => "nonce_already_pending",
            PoolError::InsufficientBalance { .. } => "insufficient_balance",
            PoolError::UnknownSenderForUnstake => "unknown_sender_for_unstake",
            PoolError::InsufficientStake { .. } => "insufficient_stake",
            PoolError::NotAContract(_) => "not_a_contract",
            PoolError::ContractExists(_) => "contract_exists",
            PoolError::RecipientOverflow(_) => "balance_overflow",
            PoolError::PoolFull(_) => "pool_full",
            PoolError::SenderQueueFull(_) => "sender_queue_full",
            PoolError::Storage(_) => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

/// Configuration for the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of transactions in the pool.
    pub max_transactions: usize,
    /// Maximum transactions per sender, which also bounds how far ahead of
    /// the ledger nonce a queued transaction may be.
    pub max_per_sender: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
            max_per_sender: 64,
        }
    }
}

struct PoolEntry {
    tx: Transaction,
    /// Submission order, for tie-breaking equal fees.
    seq: u64,
}

#[derive(Default)]
struct PoolInner {
    entries: HashMap<Hash, PoolEntry>,
    /// Nonce-ordered queue per sender.
    by_sender: HashMap<Address, BTreeMap<u64, Hash>>,
    next_seq: u64,
}

impl PoolInner {
    fn remove(&mut self, tx_hash: &Hash) -> Option<Transaction> {
        let entry = self.entries.remove(tx_hash)?;
        if let Some(queue) = self.by_sender.get_mut(&entry.tx.from) {
            queue.remove(&entry.tx.nonce);
            if queue.is_empty() {
                self.by_sender.remove(&entry.tx.from);
            }
        }
        Some(entry.tx)
    }
}

/// Selection heap entry: highest fee first, then earliest submission.
#[derive(PartialEq, Eq)]
struct Candidate {
    fee: u64,
    seq: u64,
    hash: Hash,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fee
            .cmp(&other.fee)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total_transactions: usize,
    pub unique_senders: usize,
    pub capacity: usize,
}

/// Transaction pool.
///
/// Lookups take a read lock; admission, selection bookkeeping and eviction
/// take the write lock.
pub struct TransactionPool {
    config: PoolConfig,
    inner: RwLock<PoolInner>,
}

impl TransactionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(PoolInner::default()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn contains(&self, tx_hash: &Hash) -> bool {
        self.inner.read().entries.contains_key(tx_hash)
    }

    pub fn get(&self, tx_hash: &Hash) -> Option<Transaction> {
        self.inner.read().entries.get(tx_hash).map(|e| e.tx.clone())
    }

    /// Check `tx` against the committed ledger as it will stand for the block
    /// at `next_height`.
    fn check_against_ledger(
        &self,
        tx: &Transaction,
        ledger: &Ledger,
        next_height: u64,
    ) -> Result<()> {
        let account = ledger.get_account(&tx.from)?;
        if tx.nonce < account.nonce {
            return Err(PoolError::NonceTooLow {
                expected: account.nonce,
                got: tx.nonce,
            });
        }
        let depth = self.config.max_per_sender;
        if tx.nonce - account.nonce >= depth as u64 {
            return Err(PoolError::NonceTooFar {
                next: account.nonce,
                got: tx.nonce,
                depth,
            });
        }

        let available = account.spendable_at(next_height);
        let required = tx.balance_cost();
        if required > available {
            return Err(PoolError::InsufficientBalance {
                required,
                available,
            });
        }

        match tx.kind {
            TxKind::Unstake => {
                if account.staked == 0 {
                    return Err(PoolError::UnknownSenderForUnstake);
                }
                if tx.amount > account.staked {
                    return Err(PoolError::InsufficientStake {
                        staked: account.staked,
                        requested: tx.amount,
                    });
                }
            }
            TxKind::Stake => {}
            TxKind::Transfer => {
                Self::check_recipient(tx, tx.to.unwrap_or_default(), ledger)?;
            }
            TxKind::ContractDeploy => {
                let address = tx.contract_address().unwrap_or_default();
                if ledger.get_account(&address)?.is_contract() {
                    return Err(PoolError::ContractExists(address));
                }
                Self::check_recipient(tx, address, ledger)?;
            }
            TxKind::ContractCall => {
                let address = tx.to.unwrap_or_default();
                if !ledger.get_account(&address)?.is_contract() {
                    return Err(PoolError::NotAContract(address));
                }
                Self::check_recipient(tx, address, ledger)?;
            }
        }
        Ok(())
    }

    /// The credit must fit the recipient's committed balance.
    fn check_recipient(tx: &Transaction, to: Address, ledger: &Ledger) -> Result<()> {
        if to == tx.from {
            return Ok(());
        }
        match ledger.get_account(&to)?.balance.checked_add(tx.amount) {
            Some(_) => Ok(()),
            None => Err(PoolError::RecipientOverflow(to)),
        }
    }

    /// Admit a transaction. Returns its hash.
    pub fn add(&self, tx: Transaction, ledger: &Ledger, next_height: u64) -> Result<Hash> {
        TransactionValidator::validate_stateless(&tx)?;
        let tx_hash = tx.hash();
        if self.contains(&tx_hash) {
            return Err(PoolError::Duplicate);
        }
        self.check_against_ledger(&tx, ledger, next_height)?;

        let mut inner = self.inner.write();
        if inner.entries.contains_key(&tx_hash) {
            return Err(PoolError::Duplicate);
        }
        if inner.entries.len() >= self.config.max_transactions {
            return Err(PoolError::PoolFull(self.config.max_transactions));
        }
        if let Some(queue) = inner.by_sender.get(&tx.from) {
            if queue.contains_key(&tx.nonce) {
                return Err(PoolError::NonceAlreadyPending(tx.nonce));
            }
            if queue.len() >= self.config.max_per_sender {
                return Err(PoolError::SenderQueueFull(self.config.max_per_sender));
            }
        }
        inner
            .by_sender
            .entry(tx.from)
            .or_default()
            .insert(tx.nonce, tx_hash);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        debug!(hash = %tx_hash, from = %tx.from, nonce = tx.nonce, fee = tx.fee, "transaction admitted");
        inner.entries.insert(tx_hash, PoolEntry { tx, seq });
        Ok(tx_hash)
    }

    /// Candidates for the next block, up to `max`.
    ///
    /// Orders by fee descending, then submission order, while keeping each
    /// sender's nonces contiguous from its ledger nonce. Queued transactions
    /// behind a gap are not returned.
    pub fn select(&self, ledger: &Ledger, max: usize) -> Result<Vec<Transaction>> {
        let inner = self.inner.read();

        let mut heap = BinaryHeap::new();
        for (sender, queue) in &inner.by_sender {
            let nonce = ledger.get_account(sender)?.nonce;
            if let Some(hash) = queue.get(&nonce) {
                let entry = &inner.entries[hash];
                heap.push(Candidate {
                    fee: entry.tx.fee,
                    seq: entry.seq,
                    hash: *hash,
                });
            }
        }

        let mut selected = Vec::with_capacity(max.min(inner.entries.len()));
        while selected.len() < max {
            let Some(candidate) = heap.pop() else { break };
            let tx = &inner.entries[&candidate.hash].tx;
            let following = tx.nonce + 1;
            if let Some(hash) = inner.by_sender.get(&tx.from).and_then(|q| q.get(&following)) {
                let entry = &inner.entries[hash];
                heap.push(Candidate {
                    fee: entry.tx.fee,
                    seq: entry.seq,
                    hash: *hash,
                });
            }
            selected.push(tx.clone());
        }
        Ok(selected)
    }

    /// Remove `included` transactions and re-check every remaining one
    /// against the new committed state. Returns the evicted hashes.
    pub fn on_block_committed(
        &self,
        included: &[Hash],
        ledger: &Ledger,
        next_height: u64,
    ) -> Result<Vec<Hash>> {
        let mut inner = self.inner.write();
        for tx_hash in included {
            inner.remove(tx_hash);
        }

        let mut evicted = Vec::new();
        let hashes: Vec<Hash> = inner.entries.keys().copied().collect();
        for tx_hash in hashes {
            let tx = &inner.entries[&tx_hash].tx;
            match self.check_against_ledger(tx, ledger, next_height) {
                Ok(()) => {}
                Err(PoolError::Storage(e)) => return Err(PoolError::Storage(e)),
                Err(reason) => {
                    debug!(hash = %tx_hash, reason = %reason, "transaction evicted");
                    inner.remove(&tx_hash);
                    evicted.push(tx_hash);
                }
            }
        }
        Ok(evicted)
    }

    /// Drop a transaction, returning it if it was present.
    pub fn remove(&self, tx_hash: &Hash) -> Option<Transaction> {
        self.inner.write().remove(tx_hash)
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.read();
        PoolStats {
            total_transactions: inner.entries.len(),
            unique_senders: inner.by_sender.len(),
            capacity: self.config.max_transactions,
        }
    }

    /// Transactions whose nonce is exactly the sender's next nonce, and the
    /// rest (queued behind a gap).
    pub fn ready_and_queued(&self, ledger: &Ledger) -> Result<(usize, usize)> {
        let inner = self.inner.read();
        let mut ready = 0;
        for (sender, queue) in &inner.by_sender {
            let mut nonce = ledger.get_account(sender)?.nonce;
            while queue.contains_key(&nonce) {
                ready += 1;
                nonce += 1;
            }
        }
        Ok((ready, inner.entries.len() - ready))
    }
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

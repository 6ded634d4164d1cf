//! Account ledger: balances, nonces, stake and contract state.
//!
//! [`Ledger`] reads committed state. Every mutation goes through a
//! [`LedgerBatch`], an in-memory overlay scoped to one block. A batch is either
//! turned into storage operations and committed together with its block, or
//! dropped, so a partially applied block never reaches disk.

use crate::db::{keys, BatchOp, Result as StorageResult, Storage, StorageError};
use stakechain_core::{
    hash, hash_concat, merkle_root, Account, Address, ChainParams, ContractCall,
    ContractExecutor, ContractStorage, Hash, PublicKey, Slot, Transaction, TransactionError, TxKind,
    Unbonding,
};
use std::cell::RefCell;
use std::collections::{hash_map::Entry, BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

/// Namespaces committed to by the state root.
const STATE_PREFIXES: [&[u8]; 3] = [keys::ACCOUNT, keys::CONTRACT_STORAGE, keys::SLASHED];

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance: address {address}, required {required}, available {available}")]
    InsufficientBalance {
        address: Address,
        required: u64,
        available: u64,
    },

    #[error("invalid nonce for {address}: expected {expected}, got {got}")]
    InvalidNonce {
        address: Address,
        expected: u64,
        got: u64,
    },

    #[error("unstake from {0}, which has no stake")]
    UnknownSenderForUnstake(Address),

    #[error("insufficient stake: address {address}, staked {staked}, requested {requested}")]
    InsufficientStake {
        address: Address,
        staked: u64,
        requested: u64,
    },

    #[error("supply cap exceeded: requested {requested}, headroom {headroom}")]
    SupplyCapExceeded { requested: u64, headroom: u64 },

    #[error("{0} is not a contract")]
    NotAContract(Address),

    #[error("contract {0} already exists")]
    ContractExists(Address),

    #[error("balance of {0} would overflow")]
    BalanceOverflow(Address),

    #[error("malformed transaction: {0}")]
    Malformed(#[from] TransactionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Stable reason tag for adapters.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::InvalidNonce { .. } => "invalid_nonce",
            LedgerError::UnknownSenderForUnstake(_) => "unknown_sender_for_unstake",
            LedgerError::InsufficientStake { .. } => "insufficient_stake",
            LedgerError::SupplyCapExceeded { .. } => "supply_cap_exceeded",
            LedgerError::NotAContract(_) => "not_a_contract",
            LedgerError::ContractExists(_) => "contract_exists",
            LedgerError::BalanceOverflow(_) => "balance_overflow",
            LedgerError::Malformed(_) => "malformed_transaction",
            LedgerError::Storage(_) => "storage_failure",
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Effect of one applied transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDelta {
    pub tx_hash: Hash,
    pub kind: TxKind,
    pub fee: u64,
    /// False when contract execution failed; the fee and nonce are still consumed.
    pub success: bool,
    pub gas_used: u64,
    /// Contract created or called.
    pub contract: Option<Address>,
}

/// A transaction that stopped a block batch.
#[derive(Debug, Error)]
#[error("transaction {index} ({tx}) failed: {error}")]
pub struct BatchFailure {
    pub index: usize,
    pub tx: Hash,
    #[source]
    pub error: LedgerError,
}

/// Totals of one batch, folded into the chain metadata on commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub minted: u64,
    pub burned: u64,
    pub fees: u64,
}

/// Block context a batch is applied under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    pub timestamp: u64,
    pub producer: Address,
}

/// Committed account state.
#[derive(Clone)]
pub struct Ledger {
    storage: Storage,
    params: ChainParams,
}

impl Ledger {
    pub fn new(storage: Storage, params: ChainParams) -> Self {
        Self { storage, params }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Committed account, or the empty default.
    pub fn get_account(&self, address: &Address) -> StorageResult<Account> {
        Ok(self
            .storage
            .get::<_, Account>(Storage::account_key(address))?
            .unwrap_or_default())
    }

    pub fn get_code(&self, code_hash: &Hash) -> StorageResult<Option<Vec<u8>>> {
        self.storage.get(Storage::code_key(code_hash))
    }

    /// Read a contract storage slot; uninitialized slots are zero.
    pub fn sload(&self, contract: &Address, slot: &Slot) -> StorageResult<Slot> {
        Ok(self
            .storage
            .get::<_, Slot>(Storage::contract_storage_key(contract, slot))?
            .unwrap_or([0u8; 32]))
    }

    /// Has the offence `(offender, height)` already been punished?
    pub fn is_slashed(&self, offender: &Address, height: u64) -> StorageResult<bool> {
        self.storage.contains(Storage::slashed_key(offender, height))
    }

    /// Accounts carrying stake state, in address order.
    pub fn validators(&self) -> StorageResult<Vec<(Address, Account)>> {
        let mut out = Vec::new();
        for (key, _) in self.storage.scan_prefix_raw(keys::VALIDATOR)? {
            let bytes: [u8; 20] = key[keys::VALIDATOR.len()..]
                .try_into()
                .map_err(|_| StorageError::Corrupt("malformed validator index key".into()))?;
            let address = Address(bytes);
            out.push((address, self.get_account(&address)?));
        }
        Ok(out)
    }

    /// `(address, stake)` of every validator eligible to produce at `height`,
    /// in address order.
    pub fn eligible_validators(&self, height: u64) -> StorageResult<Vec<(Address, u64)>> {
        Ok(self
            .validators()?
            .into_iter()
            .filter(|(_, account)| account.is_eligible(height, self.params.min_validator_stake))
            .map(|(address, account)| (address, account.staked))
            .collect())
    }

    /// Commitment over committed state.
    pub fn state_root(&self) -> StorageResult<Hash> {
        Ok(root_of(&self.committed_state()?))
    }

    fn committed_state(&self) -> StorageResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut entries = BTreeMap::new();
        for prefix in STATE_PREFIXES {
            entries.extend(self.storage.scan_prefix_raw(prefix)?);
        }
        Ok(entries)
    }

    /// Start an overlay for the block described by `ctx`.
    pub fn batch(&self, ctx: BlockContext, cumulative_supply: u64) -> LedgerBatch<'_> {
        LedgerBatch {
            ledger: self,
            ctx,
            supply_before: cumulative_supply,
            accounts: HashMap::new(),
            writes: BTreeMap::new(),
            summary: BatchSummary::default(),
        }
    }
}

fn root_of(entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> Hash {
    let leaves: Vec<Hash> = entries
        .iter()
        .map(|(key, value)| hash_concat(&[key.as_slice(), value.as_slice()]))
        .collect();
    merkle_root(&leaves)
}

/// Pending state changes for one block.
pub struct LedgerBatch<'a> {
    ledger: &'a Ledger,
    ctx: BlockContext,
    supply_before: u64,
    accounts: HashMap<Address, Account>,
    /// Raw writes outside the account namespace; `None` deletes.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    summary: BatchSummary,
}

impl<'a> LedgerBatch<'a> {
    pub fn context(&self) -> &BlockContext {
        &self.ctx
    }

    pub fn summary(&self) -> BatchSummary {
        self.summary
    }

    /// Cumulative supply including what this batch minted.
    pub fn cumulative_supply(&self) -> u64 {
        self.supply_before + self.summary.minted
    }

    /// Account as seen through the overlay.
    pub fn get_account(&self, address: &Address) -> Result<Account> {
        match self.accounts.get(address) {
            Some(account) => Ok(account.clone()),
            None => Ok(self.ledger.get_account(address)?),
        }
    }

    fn account_mut(&mut self, address: &Address) -> Result<&mut Account> {
        let ledger = self.ledger;
        Ok(match self.accounts.entry(*address) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(ledger.get_account(address)?),
        })
    }

    fn credit(&mut self, address: &Address, amount: u64) -> Result<()> {
        self.account_mut(address)?
            .credit(amount)
            .ok_or(LedgerError::BalanceOverflow(*address))
    }

    fn debit(&mut self, address: &Address, amount: u64) -> Result<()> {
        let account = self.account_mut(address)?;
        let available = account.balance;
        account.debit(amount).ok_or(LedgerError::InsufficientBalance {
            address: *address,
            required: amount,
            available,
        })
    }

    fn slot(&self, contract: &Address, slot: &Slot) -> Result<Slot> {
        let key = Storage::contract_storage_key(contract, slot);
        match self.writes.get(&key) {
            Some(Some(bytes)) => Ok(bincode::deserialize(bytes).map_err(StorageError::from)?),
            Some(None) => Ok([0u8; 32]),
            None => Ok(self.ledger.sload(contract, slot)?),
        }
    }

    fn code(&self, code_hash: &Hash) -> Result<Option<Vec<u8>>> {
        match self.writes.get(&Storage::code_key(code_hash)) {
            Some(Some(bytes)) => Ok(Some(bincode::deserialize(bytes).map_err(StorageError::from)?)),
            Some(None) => Ok(None),
            None => Ok(self.ledger.get_code(code_hash)?),
        }
    }

    fn write<V: serde::Serialize>(&mut self, key: Vec<u8>, value: &V) -> Result<()> {
        let bytes = bincode::serialize(value).map_err(StorageError::from)?;
        self.writes.insert(key, Some(bytes));
        Ok(())
    }

    /// Release matured unbonding and end expired cooldowns.
    ///
    /// Runs first in every block so all nodes change validator state at the
    /// same height.
    pub fn settle(&mut self) -> Result<()> {
        let height = self.ctx.height;
        let min_stake = self.ledger.params.min_validator_stake;
        for (address, committed) in self.ledger.validators()? {
            let mut account = self.accounts.get(&address).cloned().unwrap_or(committed);
            let before = account.clone();

            let (matured, locked): (Vec<Unbonding>, Vec<Unbonding>) = account
                .unbonding
                .drain(..)
                .partition(|u| u.release_height <= height);
            account.unbonding = locked;
            for entry in matured {
                account
                    .credit(entry.amount)
                    .ok_or(LedgerError::BalanceOverflow(address))?;
            }

            if matches!(account.cooldown_until, Some(until) if height > until) {
                account.cooldown_until = None;
                account.active = account.staked >= min_stake;
            }

            if account != before {
                debug!(%address, height, active = account.active, "validator settled");
                self.accounts.insert(address, account);
            }
        }
        Ok(())
    }

    /// Apply one transaction on top of the overlay.
    ///
    /// Every check runs before the first write, so a failing transaction
    /// leaves the overlay untouched.
    pub fn apply(
        &mut self,
        tx: &Transaction,
        executor: &dyn ContractExecutor,
    ) -> Result<StateDelta> {
        tx.check_shape()?;
        let from = tx.from;
        let sender = self.get_account(&from)?;

        if tx.nonce != sender.nonce {
            return Err(LedgerError::InvalidNonce {
                address: from,
                expected: sender.nonce,
                got: tx.nonce,
            });
        }
        let required = tx.balance_cost();
        let overflows = tx.kind != TxKind::Unstake && tx.amount.checked_add(tx.fee).is_none();
        if overflows || sender.balance < required {
            return Err(LedgerError::InsufficientBalance {
                address: from,
                required,
                available: sender.balance,
            });
        }

        let mut contract = None;
        match tx.kind {
            TxKind::Transfer => {
                let to = tx.to.unwrap_or_default();
                if to != from {
                    self.check_credit(&to, tx.amount)?;
                }
            }
            TxKind::Stake => {}
            TxKind::Unstake => {
                if sender.staked == 0 {
                    return Err(LedgerError::UnknownSenderForUnstake(from));
                }
                if tx.amount > sender.staked {
                    return Err(LedgerError::InsufficientStake {
                        address: from,
                        staked: sender.staked,
                        requested: tx.amount,
                    });
                }
            }
            TxKind::ContractDeploy => {
                let address = tx.contract_address().unwrap_or_default();
                if self.get_account(&address)?.is_contract() {
                    return Err(LedgerError::ContractExists(address));
                }
                self.check_credit(&address, tx.amount)?;
                contract = Some(address);
            }
            TxKind::ContractCall => {
                let address = tx.to.unwrap_or_default();
                if !self.get_account(&address)?.is_contract() {
                    return Err(LedgerError::NotAContract(address));
                }
                if address != from {
                    self.check_credit(&address, tx.amount)?;
                }
                contract = Some(address);
            }
        }

        // Checks passed; mutate.
        {
            let account = self.account_mut(&from)?;
            account.nonce += 1;
            if account.public_key.is_none() {
                account.public_key = Some(tx.public_key);
            }
        }
        self.debit(&from, tx.fee)?;
        self.summary.fees += tx.fee;

        let mut success = true;
        let mut gas_used = 0;
        match tx.kind {
            TxKind::Transfer => {
                self.debit(&from, tx.amount)?;
                self.credit(&tx.to.unwrap_or_default(), tx.amount)?;
            }
            TxKind::Stake => self.stake(&from, tx.amount)?,
            TxKind::Unstake => self.unstake(&from, tx.amount)?,
            TxKind::ContractDeploy | TxKind::ContractCall => {
                let address = contract.unwrap_or_default();
                let (ok, gas) = self.run_contract(tx, &address, executor)?;
                success = ok;
                gas_used = gas;
            }
        }

        Ok(StateDelta {
            tx_hash: tx.hash(),
            kind: tx.kind,
            fee: tx.fee,
            success,
            gas_used,
            contract,
        })
    }

    fn check_credit(&self, address: &Address, amount: u64) -> Result<()> {
        self.get_account(address)?
            .balance
            .checked_add(amount)
            .map(|_| ())
            .ok_or(LedgerError::BalanceOverflow(*address))
    }

    fn run_contract(
        &mut self,
        tx: &Transaction,
        address: &Address,
        executor: &dyn ContractExecutor,
    ) -> Result<(bool, u64)> {
        let is_deploy = tx.kind == TxKind::ContractDeploy;
        let code = if is_deploy {
            tx.payload.clone()
        } else {
            match self.get_account(address)?.code_hash {
                Some(code_hash) => self.code(&code_hash)?.unwrap_or_default(),
                None => return Err(LedgerError::NotAContract(*address)),
            }
        };
        let input: &[u8] = if is_deploy { &[] } else { &tx.payload };

        let call = ContractCall {
            contract: *address,
            caller: tx.from,
            code: &code,
            input,
            value: tx.amount,
            height: self.ctx.height,
            timestamp: self.ctx.timestamp,
            is_deploy,
        };
        let view = ContractView {
            batch: self,
            contract: *address,
            error: RefCell::new(None),
        };
        let outcome = executor.execute(&call, &view);
        if let Some(err) = view.error.into_inner() {
            return Err(err);
        }

        if !outcome.success {
            warn!(tx = %tx.hash(), contract = %address, gas = outcome.gas_used, "contract execution failed");
            return Ok((false, outcome.gas_used));
        }

        if is_deploy {
            let code_hash = hash(&code);
            self.write(Storage::code_key(&code_hash), &code)?;
            self.account_mut(address)?.code_hash = Some(code_hash);
        }
        self.debit(&tx.from, tx.amount)?;
        self.credit(address, tx.amount)?;
        for (slot, value) in outcome.state_diff {
            let key = Storage::contract_storage_key(address, &slot);
            if value == [0u8; 32] {
                self.writes.insert(key, None);
            } else {
                self.write(key, &value)?;
            }
        }
        Ok((true, outcome.gas_used))
    }

    /// Apply a block's transactions in order. The first failure aborts the
    /// batch; the caller must then drop it.
    pub fn apply_block_batch(
        &mut self,
        transactions: &[Transaction],
        executor: &dyn ContractExecutor,
    ) -> std::result::Result<Vec<StateDelta>, BatchFailure> {
        let mut deltas = Vec::with_capacity(transactions.len());
        for (index, tx) in transactions.iter().enumerate() {
            match self.apply(tx, executor) {
                Ok(delta) => deltas.push(delta),
                Err(error) => {
                    return Err(BatchFailure {
                        index,
                        tx: tx.hash(),
                        error,
                    })
                }
            }
        }
        Ok(deltas)
    }

    /// Lock `amount` of the balance as stake.
    pub fn stake(&mut self, address: &Address, amount: u64) -> Result<()> {
        self.debit(address, amount)?;
        let min_stake = self.ledger.params.min_validator_stake;
        let account = self.account_mut(address)?;
        account.staked = account
            .staked
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow(*address))?;
        if account.staked >= min_stake && account.cooldown_until.is_none() {
            account.active = true;
        }
        Ok(())
    }

    /// Move `amount` of stake into the unbonding queue.
    pub fn unstake(&mut self, address: &Address, amount: u64) -> Result<()> {
        let min_stake = self.ledger.params.min_validator_stake;
        let release_height = self.ctx.height.saturating_add(self.ledger.params.unbonding_blocks);
        let account = self.account_mut(address)?;
        if account.staked == 0 {
            return Err(LedgerError::UnknownSenderForUnstake(*address));
        }
        if amount > account.staked {
            return Err(LedgerError::InsufficientStake {
                address: *address,
                staked: account.staked,
                requested: amount,
            });
        }
        account.staked -= amount;
        account.unbonding.push(Unbonding {
            amount,
            release_height,
        });
        if account.staked < min_stake {
            account.active = false;
        }
        Ok(())
    }

    /// Burn up to `penalty` of stake, deactivate the validator and start its
    /// cooldown. Returns the amount burned.
    pub fn slash(&mut self, address: &Address, penalty: u64) -> Result<u64> {
        let until = self
            .ctx
            .height
            .saturating_add(self.ledger.params.slash_cooldown_blocks);
        let account = self.account_mut(address)?;
        let burned = penalty.min(account.staked);
        account.staked -= burned;
        account.active = false;
        account.cooldown_until = Some(until);
        self.summary.burned += burned;
        Ok(burned)
    }

    /// Offence already punished, counting this batch?
    pub fn is_slashed(&self, offender: &Address, height: u64) -> Result<bool> {
        match self.writes.get(&Storage::slashed_key(offender, height)) {
            Some(entry) => Ok(entry.is_some()),
            None => Ok(self.ledger.is_slashed(offender, height)?),
        }
    }

    /// Record that the offence `(offender, height)` has been punished.
    pub fn mark_slashed(&mut self, offender: &Address, height: u64) -> Result<()> {
        let at = self.ctx.height;
        self.write(Storage::slashed_key(offender, height), &at)
    }

    /// Create new units. Fails rather than exceed the supply cap.
    pub fn mint(&mut self, address: &Address, amount: u64) -> Result<()> {
        let headroom = self
            .ledger
            .params
            .supply_cap
            .saturating_sub(self.cumulative_supply());
        if amount > headroom {
            return Err(LedgerError::SupplyCapExceeded {
                requested: amount,
                headroom,
            });
        }
        self.credit(address, amount)?;
        self.summary.minted += amount;
        Ok(())
    }

    /// Credit the fees collected so far to the producer.
    pub fn pay_fees(&mut self) -> Result<()> {
        let fees = self.summary.fees;
        if fees > 0 {
            let producer = self.ctx.producer;
            self.credit(&producer, fees)?;
        }
        Ok(())
    }

    /// Record a key for an account that has not yet sent a transaction.
    pub fn register_key(&mut self, public_key: PublicKey) -> Result<()> {
        let account = self.account_mut(&public_key.to_address())?;
        if account.public_key.is_none() {
            account.public_key = Some(public_key);
        }
        Ok(())
    }

    fn account_writes(&self) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        let mut out = Vec::with_capacity(self.accounts.len());
        for (address, account) in &self.accounts {
            let value = if account.is_empty() {
                None
            } else {
                Some(bincode::serialize(account).map_err(StorageError::from)?)
            };
            out.push((Storage::account_key(address), value));
        }
        Ok(out)
    }

    /// Commitment over committed state with this overlay applied.
    pub fn state_root(&self) -> Result<Hash> {
        let mut entries = self.ledger.committed_state()?;
        let pending = self.account_writes()?.into_iter().chain(
            self.writes
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        for (key, value) in pending {
            if !STATE_PREFIXES.iter().any(|p| key.starts_with(p)) {
                continue;
            }
            match value {
                Some(value) => {
                    entries.insert(key, value);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(root_of(&entries))
    }

    /// Storage operations for committing the overlay, plus its totals.
    pub fn into_ops(self) -> Result<(Vec<BatchOp>, BatchSummary)> {
        let mut ops = Vec::with_capacity(self.accounts.len() * 2 + self.writes.len());
        for (key, value) in self.account_writes()? {
            ops.push(match value {
                Some(value) => BatchOp::Insert { key, value },
                None => BatchOp::remove(key),
            });
        }
        for (address, account) in &self.accounts {
            let key = Storage::validator_key(address);
            ops.push(if account.is_validator_record() {
                BatchOp::put(key, &())?
            } else {
                BatchOp::remove(key)
            });
        }
        for (key, value) in self.writes {
            ops.push(match value {
                Some(value) => BatchOp::Insert { key, value },
                None => BatchOp::remove(key),
            });
        }
        Ok((ops, self.summary))
    }
}

/// Contract storage as seen by the executor during one call.
struct ContractView<'b, 'a> {
    batch: &'b LedgerBatch<'a>,
    contract: Address,
    error: RefCell<Option<LedgerError>>,
}

impl ContractStorage for ContractView<'_, '_> {
    fn sload(&self, key: &Slot) -> Slot {
        match self.batch.slot(&self.contract, key) {
            Ok(value) => value,
            Err(err) => {
                self.error.borrow_mut().get_or_insert(err);
                [0u8; 32]
            }
        }
    }
}

//! Account state representation.

use crate::crypto::PublicKey;
use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// Stake that has been unstaked and is waiting to become spendable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unbonding {
    pub amount: u64,
    /// First height at which the amount is released to the balance.
    pub release_height: u64,
}

/// An account in the ledger.
///
/// Every address implicitly has a default (empty) account. Stake and the
/// validator flags live on the same record, so the validator set is a
/// projection of the accounts with non-zero stake.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Account {
    /// Number of transactions sent from this account.
    pub nonce: u64,
    /// Spendable balance in base units.
    pub balance: u64,
    /// Amount locked as validator stake.
    pub staked: u64,
    /// Eligible for producer selection.
    pub active: bool,
    /// Set by a slash. While present, the account is not eligible at any
    /// height up to and including this one.
    pub cooldown_until: Option<u64>,
    /// Unstaked amounts that are still locked.
    pub unbonding: Vec<Unbonding>,
    /// Key recorded from the first signed transaction (or genesis).
    pub public_key: Option<PublicKey>,
    /// Code hash for contract accounts.
    pub code_hash: Option<Hash>,
}

impl Account {
    pub fn with_balance(balance: u64) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    pub fn is_contract(&self) -> bool {
        self.code_hash.is_some()
    }

    /// True if nothing distinguishes this account from a never-touched one.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Total of unbonding entries.
    pub fn unbonding_total(&self) -> u64 {
        self.unbonding.iter().map(|u| u.amount).sum()
    }

    /// Balance available to a transaction in a block at `height`: the balance
    /// plus unbonding entries that are released by then.
    pub fn spendable_at(&self, height: u64) -> u64 {
        self.unbonding
            .iter()
            .filter(|u| u.release_height <= height)
            .fold(self.balance, |acc, u| acc.saturating_add(u.amount))
    }

    /// Can this account produce the block at `height`?
    pub fn is_eligible(&self, height: u64, min_stake: u64) -> bool {
        if self.staked < min_stake {
            return false;
        }
        match self.cooldown_until {
            Some(until) => height > until,
            None => self.active,
        }
    }

    /// Tracked by the validator index: anything with stake or pending stake state.
    pub fn is_validator_record(&self) -> bool {
        self.staked > 0 || !self.unbonding.is_empty() || self.cooldown_until.is_some()
    }

    pub fn credit(&mut self, amount: u64) -> Option<()> {
        self.balance = self.balance.checked_add(amount)?;
        Some(())
    }

    pub fn debit(&mut self, amount: u64) -> Option<()> {
        self.balance = self.balance.checked_sub(amount)?;
        Some(())
    }
}

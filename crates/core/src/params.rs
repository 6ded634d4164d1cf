//! Protocol parameters fixed for a network instance at genesis.

use serde::{Deserialize, Serialize};

/// Decimal places of one UNM.
pub const DECIMALS: u32 = 8;

/// Base units per UNM.
pub const COIN: u64 = 100_000_000;

/// Hard cap on cumulative minted supply, genesis allocations included.
pub const SUPPLY_CAP: u64 = 100_000_000 * COIN;

/// Reward for blocks in era 0 (0.5 UNM).
pub const BASE_REWARD: u64 = COIN / 2;

/// Blocks per era.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Target seconds between blocks.
pub const BLOCK_INTERVAL_SECS: u64 = 5;

/// Minimum stake for producer eligibility (10,000 UNM).
pub const MIN_VALIDATOR_STAKE: u64 = 10_000 * COIN;

/// Blocks built on top of a block before it is final.
pub const CONFIRMATION_DEPTH: u64 = 10;

/// Share of stake removed by a slash, in basis points.
pub const SLASH_PENALTY_BPS: u64 = 500;

/// Blocks a slashed validator stays ineligible.
pub const SLASH_COOLDOWN_BLOCKS: u64 = 17_280;

/// Blocks unstaked funds stay locked.
pub const UNBONDING_BLOCKS: u64 = 120_960;

pub const MAX_TXS_PER_BLOCK: usize = 1_000;

/// How far ahead of local time a block timestamp may be.
pub const MAX_CLOCK_DRIFT_SECS: u64 = 60;

/// Every tunable protocol rule in one place.
///
/// The value is written to storage at genesis; a node refuses to open a store
/// whose recorded parameters differ from its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub supply_cap: u64,
    pub base_reward: u64,
    pub halving_interval: u64,
    pub block_interval_secs: u64,
    pub min_validator_stake: u64,
    pub confirmation_depth: u64,
    pub slash_penalty_bps: u64,
    pub slash_cooldown_blocks: u64,
    pub unbonding_blocks: u64,
    pub max_txs_per_block: usize,
    pub max_clock_drift_secs: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            supply_cap: SUPPLY_CAP,
            base_reward: BASE_REWARD,
            halving_interval: HALVING_INTERVAL,
            block_interval_secs: BLOCK_INTERVAL_SECS,
            min_validator_stake: MIN_VALIDATOR_STAKE,
            confirmation_depth: CONFIRMATION_DEPTH,
            slash_penalty_bps: SLASH_PENALTY_BPS,
            slash_cooldown_blocks: SLASH_COOLDOWN_BLOCKS,
            unbonding_blocks: UNBONDING_BLOCKS,
            max_txs_per_block: MAX_TXS_PER_BLOCK,
            max_clock_drift_secs: MAX_CLOCK_DRIFT_SECS,
        }
    }
}

impl ChainParams {
    /// Era index of a height.
    ///
    /// Eras count reward-bearing blocks: genesis pays nothing, so blocks
    /// `1..=halving_interval` form era 0.
    pub fn era(&self, height: u64) -> u64 {
        height.saturating_sub(1) / self.halving_interval.max(1)
    }
}

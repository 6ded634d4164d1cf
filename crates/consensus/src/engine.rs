//! Proof of Stake rules: producer selection, the emission schedule and slashing.
//!
//! Everything here is a pure function of committed chain data. No clock, RNG
//! or node-local state enters producer selection, so any two nodes with the
//! same chain compute the same producer for the same height.

use stakechain_core::{hash_concat, Address, ChainParams, Evidence, EvidenceError, Hash};
use stakechain_storage::{Ledger, LedgerBatch, LedgerError, StorageError};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during consensus operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("offender {0} has no recorded public key")]
    UnknownOffender(Address),

    #[error("invalid evidence: {0}")]
    InvalidEvidence(#[from] EvidenceError),

    #[error("evidence for height {offence} cannot be included at height {height}")]
    EvidenceFromFuture { offence: u64, height: u64 },

    #[error("offence by {offender} at height {height} was already slashed")]
    AlreadySlashed { offender: Address, height: u64 },

    #[error("offender {0} has no stake to slash")]
    NotStaked(Address),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ConsensusError {
    pub fn code(&self) -> &'static str {
        match self {
            ConsensusError::UnknownOffender(_) => "unknown_offender",
            ConsensusError::InvalidEvidence(_) => "invalid_evidence",
            ConsensusError::EvidenceFromFuture { .. } => "evidence_from_future",
            ConsensusError::AlreadySlashed { .. } => "already_slashed",
            ConsensusError::NotStaked(_) => "not_staked",
            ConsensusError::Ledger(err) => err.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// A slash applied while executing a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashRecord {
    pub offender: Address,
    /// Height of the offence.
    pub offence_height: u64,
    /// Stake removed.
    pub burned: u64,
}

/// Proof of Stake engine for one network's parameters.
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    params: ChainParams,
}

impl ConsensusEngine {
    pub fn new(params: ChainParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Seed for the producer lottery at `height`.
    pub fn selection_seed(prev_hash: &Hash, height: u64) -> Hash {
        hash_concat(&[prev_hash.as_ref(), &height.to_be_bytes()])
    }

    /// Stake-weighted lottery over `validators` (`(address, stake)` pairs).
    ///
    /// Candidates are sorted by address before drawing, so the caller's order
    /// does not matter. Returns `None` when no candidate has stake.
    pub fn select_producer(
        prev_hash: &Hash,
        height: u64,
        validators: &[(Address, u64)],
    ) -> Option<Address> {
        let mut candidates: Vec<(Address, u64)> = validators
            .iter()
            .copied()
            .filter(|(_, stake)| *stake > 0)
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        candidates.dedup_by(|a, b| a.0 == b.0);

        let total: u128 = candidates.iter().map(|(_, stake)| *stake as u128).sum();
        if total == 0 {
            return None;
        }

        let draw = Self::selection_seed(prev_hash, height).to_u128() % total;
        let mut cumulative = 0u128;
        for (address, stake) in &candidates {
            cumulative += *stake as u128;
            if draw < cumulative {
                return Some(*address);
            }
        }
        None
    }

    /// Producer of the block at `height`, which extends the committed tip
    /// `prev_hash`.
    pub fn producer_for_height(
        &self,
        ledger: &Ledger,
        prev_hash: &Hash,
        height: u64,
    ) -> std::result::Result<Option<Address>, StorageError> {
        let validators = ledger.eligible_validators(height)?;
        Ok(Self::select_producer(prev_hash, height, &validators))
    }

    /// Reward due at `height` before the supply cap is considered.
    pub fn scheduled_reward(&self, height: u64) -> u64 {
        if height == 0 {
            return 0;
        }
        u32::try_from(self.params.era(height))
            .ok()
            .and_then(|era| self.params.base_reward.checked_shr(era))
            .unwrap_or(0)
    }

    /// Reward credited at `height` given the supply minted so far: the
    /// scheduled reward truncated to the remaining headroom.
    pub fn block_reward(&self, height: u64, cumulative_supply: u64) -> u64 {
        let headroom = self.params.supply_cap.saturating_sub(cumulative_supply);
        self.scheduled_reward(height).min(headroom)
    }

    /// Stake removed by one slash.
    pub fn slash_penalty(&self, stake: u64) -> u64 {
        let penalty = stake as u128 * self.params.slash_penalty_bps as u128 / 10_000;
        penalty.min(stake as u128) as u64
    }

    /// Check evidence against the state the block carrying it is applied on.
    /// Returns the offender.
    pub fn verify_evidence(&self, batch: &LedgerBatch<'_>, evidence: &Evidence) -> Result<Address> {
        let offender = evidence.offender();
        let height = batch.context().height;
        if evidence.height() >= height {
            return Err(ConsensusError::EvidenceFromFuture {
                offence: evidence.height(),
                height,
            });
        }

        let account = batch.get_account(&offender)?;
        let key = account
            .public_key
            .ok_or(ConsensusError::UnknownOffender(offender))?;
        evidence.verify(&key)?;

        if batch.is_slashed(&offender, evidence.height())? {
            return Err(ConsensusError::AlreadySlashed {
                offender,
                height: evidence.height(),
            });
        }
        if account.staked == 0 {
            return Err(ConsensusError::NotStaked(offender));
        }
        Ok(offender)
    }

    /// Verify evidence and punish the offender inside `batch`.
    pub fn apply_evidence(
        &self,
        batch: &mut LedgerBatch<'_>,
        evidence: &Evidence,
    ) -> Result<SlashRecord> {
        let offender = self.verify_evidence(batch, evidence)?;
        let stake = batch.get_account(&offender)?.staked;
        let burned = batch.slash(&offender, self.slash_penalty(stake))?;
        batch.mark_slashed(&offender, evidence.height())?;

        info!(
            %offender,
            offence_height = evidence.height(),
            height = batch.context().height,
            burned,
            "validator slashed"
        );
        Ok(SlashRecord {
            offender,
            offence_height: evidence.height(),
            burned,
        })
    }

    /// Credit the producer with collected fees and the block reward.
    /// Returns the reward minted.
    pub fn apply_reward(&self, batch: &mut LedgerBatch<'_>) -> std::result::Result<u64, LedgerError> {
        batch.pay_fees()?;
        let ctx = *batch.context();
        let reward = self.block_reward(ctx.height, batch.cumulative_supply());
        if reward > 0 {
            batch.mint(&ctx.producer, reward)?;
        }
        debug!(height = ctx.height, producer = %ctx.producer, reward, "reward credited");
        Ok(reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakechain_core::{hash, Block, Keypair, COIN};
    use stakechain_storage::{BlockContext, Storage};

    fn engine() -> ConsensusEngine {
        ConsensusEngine::new(ChainParams::default())
    }

    #[test]
    fn test_selection_is_deterministic_and_order_independent() {
        let validators = vec![
            (Address([3u8; 20]), 30),
            (Address([1u8; 20]), 10),
            (Address([2u8; 20]), 60),
        ];
        let mut shuffled = validators.clone();
        shuffled.reverse();
        let prev = hash(b"parent");

        for height in 1..50 {
            let a = ConsensusEngine::select_producer(&prev, height, &validators);
            let b = ConsensusEngine::select_producer(&prev, height, &validators);
            let c = ConsensusEngine::select_producer(&prev, height, &shuffled);
            assert!(a.is_some());
            assert_eq!(a, b);
            assert_eq!(a, c);
        }
    }

    #[test]
    fn test_selection_skips_zero_stake() {
        let only = Address([7u8; 20]);
        let validators = vec![(Address([1u8; 20]), 0), (only, 5)];
        for height in 1..20 {
            assert_eq!(
                ConsensusEngine::select_producer(&Hash::ZERO, height, &validators),
                Some(only)
            );
        }
        assert_eq!(ConsensusEngine::select_producer(&Hash::ZERO, 1, &[]), None);
    }

    #[test]
    fn test_selection_tracks_stake_weight() {
        let heavy = Address([1u8; 20]);
        let light = Address([2u8; 20]);
        let validators = vec![(heavy, 900), (light, 100)];
        let prev = hash(b"seed");
        let heavy_wins = (1..=2_000u64)
            .filter(|h| ConsensusEngine::select_producer(&prev, *h, &validators) == Some(heavy))
            .count();
        assert!(heavy_wins > 1_600 && heavy_wins < 1_990, "heavy won {heavy_wins}");
    }

    #[test]
    fn test_reward_schedule() {
        let e = engine();
        assert_eq!(e.scheduled_reward(0), 0);
        assert_eq!(e.block_reward(1, 0), 50_000_000);
        assert_eq!(e.block_reward(210_000, 0), 50_000_000);
        assert_eq!(e.block_reward(210_001, 0), 25_000_000);
        assert_eq!(e.block_reward(420_001, 0), 12_500_000);
        assert_eq!(e.scheduled_reward(210_000 * 64 + 1), 0);
    }

    #[test]
    fn test_reward_truncated_to_headroom() {
        let e = engine();
        let cap = e.params().supply_cap;
        assert_eq!(e.block_reward(1, cap - 10), 10);
        assert_eq!(e.block_reward(1, cap), 0);
        assert_eq!(e.block_reward(1, cap + 5), 0);
    }

    #[test]
    fn test_slash_penalty_is_five_percent() {
        let e = engine();
        assert_eq!(e.slash_penalty(10_000 * COIN), 500 * COIN);
        assert_eq!(e.slash_penalty(19), 0);
        assert_eq!(e.slash_penalty(u64::MAX), u64::MAX / 20);
    }

    fn setup() -> (Storage, Ledger) {
        let storage = Storage::open_temporary().unwrap();
        let ledger = Ledger::new(storage.clone(), ChainParams::default());
        (storage, ledger)
    }

    fn staked_validator(storage: &Storage, ledger: &Ledger, kp: &Keypair) {
        let ctx = BlockContext {
            height: 0,
            timestamp: 0,
            producer: Address::ZERO,
        };
        let mut batch = ledger.batch(ctx, 0);
        batch.mint(&kp.address(), 20_000 * COIN).unwrap();
        batch.register_key(kp.public_key).unwrap();
        batch.stake(&kp.address(), 20_000 * COIN).unwrap();
        let (ops, _) = batch.into_ops().unwrap();
        storage.batch(ops).unwrap();
    }

    fn equivocation(kp: &Keypair, height: u64) -> Evidence {
        let a = Block::new(height, Hash::ZERO, 10, kp.address(), vec![], vec![], Hash::ZERO)
            .signed(kp);
        let b = Block::new(height, Hash::ZERO, 11, kp.address(), vec![], vec![], Hash::ZERO)
            .signed(kp);
        Evidence::equivocation(a.signed_header(), b.signed_header())
    }

    #[test]
    fn test_evidence_slashes_once() {
        let (storage, ledger) = setup();
        let e = engine();
        let kp = Keypair::generate();
        staked_validator(&storage, &ledger, &kp);

        let ctx = BlockContext {
            height: 6,
            timestamp: 100,
            producer: Address([9u8; 20]),
        };
        let mut batch = ledger.batch(ctx, 20_000 * COIN);
        let evidence = equivocation(&kp, 5);
        let record = e.apply_evidence(&mut batch, &evidence).unwrap();
        assert_eq!(record.offender, kp.address());
        assert_eq!(record.burned, 1_000 * COIN);

        let account = batch.get_account(&kp.address()).unwrap();
        assert_eq!(account.staked, 19_000 * COIN);
        assert!(!account.active);
        assert_eq!(account.cooldown_until, Some(6 + e.params().slash_cooldown_blocks));

        assert!(matches!(
            e.apply_evidence(&mut batch, &evidence),
            Err(ConsensusError::AlreadySlashed { height: 5, .. })
        ));
    }

    #[test]
    fn test_evidence_rejections() {
        let (storage, ledger) = setup();
        let e = engine();
        let kp = Keypair::generate();
        staked_validator(&storage, &ledger, &kp);
        let stranger = Keypair::generate();

        let ctx = BlockContext {
            height: 6,
            timestamp: 100,
            producer: Address([9u8; 20]),
        };
        let batch = ledger.batch(ctx, 0);
        assert!(matches!(
            e.verify_evidence(&batch, &equivocation(&kp, 6)),
            Err(ConsensusError::EvidenceFromFuture { offence: 6, height: 6 })
        ));
        assert!(matches!(
            e.verify_evidence(&batch, &equivocation(&stranger, 3)),
            Err(ConsensusError::UnknownOffender(_))
        ));

        let forged = match equivocation(&kp, 3) {
            Evidence::Equivocation { first, .. } => {
                let other = Block::new(3, Hash::ZERO, 99, kp.address(), vec![], vec![], Hash::ZERO)
                    .signed(&stranger);
                Evidence::Equivocation {
                    first,
                    second: other.signed_header(),
                }
            }
            other => other,
        };
        assert!(matches!(
            e.verify_evidence(&batch, &forged),
            Err(ConsensusError::InvalidEvidence(EvidenceError::BadSignature))
        ));
    }

    #[test]
    fn test_apply_reward_pays_fees_and_mints() {
        let (_storage, ledger) = setup();
        let e = engine();
        let producer = Address([5u8; 20]);
        let ctx = BlockContext {
            height: 210_001,
            timestamp: 0,
            producer,
        };
        let mut batch = ledger.batch(ctx, 0);
        assert_eq!(e.apply_reward(&mut batch).unwrap(), 25_000_000);
        assert_eq!(batch.get_account(&producer).unwrap().balance, 25_000_000);
        assert_eq!(batch.summary().minted, 25_000_000);
    }
}

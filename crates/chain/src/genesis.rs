//! Genesis construction.

use stakechain_core::{Address, Block, ChainParams, PublicKey};
use stakechain_storage::{BatchOp, BlockContext, ChainMetadata, Ledger, LedgerError};

/// Initial state of a new network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenesisConfig {
    /// Timestamp of block 0 (unix seconds).
    pub timestamp: u64,
    /// Spendable balances.
    pub allocations: Vec<(Address, u64)>,
    /// Validators that hold `stake` from height 0.
    pub validators: Vec<(PublicKey, u64)>,
}

/// Block 0 with the state it commits to.
#[derive(Debug)]
pub struct Genesis {
    pub block: Block,
    pub metadata: ChainMetadata,
    pub ops: Vec<BatchOp>,
}

impl GenesisConfig {
    /// Build block 0 over an empty `ledger`.
    ///
    /// Allocations and validator stakes are minted, so they count toward the
    /// supply cap.
    pub fn build(&self, ledger: &Ledger) -> Result<Genesis, LedgerError> {
        let ctx = BlockContext {
            height: 0,
            timestamp: self.timestamp,
            producer: Address::ZERO,
        };
        let mut batch = ledger.batch(ctx, 0);
        for (address, balance) in &self.allocations {
            batch.mint(address, *balance)?;
        }
        for (public_key, stake) in &self.validators {
            let address = public_key.to_address();
            batch.mint(&address, *stake)?;
            batch.register_key(*public_key)?;
            batch.stake(&address, *stake)?;
        }

        let state_root = batch.state_root()?;
        let cumulative_supply = batch.cumulative_supply();
        let (ops, _) = batch.into_ops()?;
        let block = Block::genesis(self.timestamp, state_root);
        let metadata = ChainMetadata {
            height: 0,
            tip_hash: block.hash(),
            cumulative_supply,
            era: 0,
        };
        Ok(Genesis {
            block,
            metadata,
            ops,
        })
    }

    /// Total minted at genesis.
    pub fn total_supply(&self) -> u64 {
        self.allocations
            .iter()
            .map(|(_, amount)| *amount)
            .chain(self.validators.iter().map(|(_, stake)| *stake))
            .fold(0u64, u64::saturating_add)
    }

    /// Cheap checks before touching storage.
    pub fn check(&self, params: &ChainParams) -> Result<(), String> {
        if self.total_supply() > params.supply_cap {
            return Err(format!(
                "genesis mints {} but the supply cap is {}",
                self.total_supply(),
                params.supply_cap
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for (public_key, _) in &self.validators {
            if !seen.insert(public_key.to_address()) {
                return Err(format!("validator {} listed twice", public_key.to_address()));
            }
        }
        Ok(())
    }
}

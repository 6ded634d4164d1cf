//! Capability interface to the contract interpreter.
//!
//! The ledger never interprets contract code. It hands code and call data to a
//! [`ContractExecutor`] together with a read view of the contract's storage and
//! writes back whatever slots the outcome reports.

use crate::crypto::Address;

/// Storage slots are 32-byte keys holding 32-byte words.
pub type Slot = [u8; 32];

/// Read access to one contract's committed-plus-pending storage.
pub trait ContractStorage {
    /// Current value of a slot; zero if never written.
    fn sload(&self, key: &Slot) -> Slot;
}

/// One invocation handed to the executor.
#[derive(Debug, Clone)]
pub struct ContractCall<'a> {
    pub contract: Address,
    pub caller: Address,
    pub code: &'a [u8],
    /// Call data; empty for deployments.
    pub input: &'a [u8],
    pub value: u64,
    pub height: u64,
    pub timestamp: u64,
    pub is_deploy: bool,
}

/// What the executor reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractOutcome {
    pub success: bool,
    pub gas_used: u64,
    /// Slots to write. Ignored unless `success`.
    pub state_diff: Vec<(Slot, Slot)>,
}

/// Runs contract code. Implementations must be deterministic: every node
/// applying the same block has to observe the same outcome.
pub trait ContractExecutor: Send + Sync {
    fn execute(&self, call: &ContractCall<'_>, storage: &dyn ContractStorage) -> ContractOutcome;
}

/// Accepts every call and changes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullExecutor;

impl ContractExecutor for NullExecutor {
    fn execute(&self, _call: &ContractCall<'_>, _storage: &dyn ContractStorage) -> ContractOutcome {
        ContractOutcome {
            success: true,
            gas_used: 0,
            state_diff: Vec::new(),
        }
    }
}

//! Outbound events for transport and API collaborators.

use stakechain_core::{Address, Block, Hash};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    BlockCommitted(Block),
    TransactionAdmitted(Hash),
    /// `height` is the height of the punished offence.
    ValidatorSlashed { address: Address, height: u64 },
}

/// Receives events from the writer. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ChainEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ChainEvent) {}
}

impl EventSink for mpsc::UnboundedSender<ChainEvent> {
    fn emit(&self, event: ChainEvent) {
        // A closed receiver only means nobody is listening.
        let _ = self.send(event);
    }
}

//! Single-writer node loop.
//!
//! [`Node`] owns the [`ChainManager`] and drains one queue of inbound
//! commands, interleaved with the block-interval tick. Callers talk to it
//! through a cloneable [`NodeHandle`] and get replies over oneshot channels.

use crate::manager::{ChainError, ChainManager, ReceiveOutcome};
use crate::reader::ChainReader;
use stakechain_core::{Block, Evidence, Hash, Transaction};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const COMMAND_QUEUE: usize = 1_024;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("node is not running")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, NodeError>;

type Reply<T> = oneshot::Sender<std::result::Result<T, ChainError>>;

enum Command {
    SubmitTransaction(Transaction, Reply<Hash>),
    ReceiveBlock(Block, Reply<ReceiveOutcome>),
    SubmitEvidence(Evidence, Reply<()>),
}

/// The writer task.
pub struct Node {
    manager: ChainManager,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
    block_interval: Duration,
}

/// Cloneable handle for submitting work to a running [`Node`].
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    shutdown: Arc<watch::Sender<bool>>,
    reader: ChainReader,
}

impl Node {
    pub fn new(manager: ChainManager, block_interval: Duration) -> (Self, NodeHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = NodeHandle {
            commands: command_tx,
            shutdown: Arc::new(shutdown_tx),
            reader: manager.reader(),
        };
        let node = Self {
            manager,
            commands: command_rx,
            shutdown: shutdown_rx,
            block_interval,
        };
        (node, handle)
    }

    /// Run until shutdown is signalled, every handle is dropped, or storage
    /// fails. Storage is flushed before returning.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.block_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            height = self.manager.tip().height,
            producer = ?self.manager.producer_address(),
            interval_ms = self.block_interval.as_millis() as u64,
            "node started"
        );

        loop {
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                // Ahead of commands so a busy queue cannot starve production.
                _ = ticker.tick() => self.tick(),
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
            if self.manager.is_halted() {
                break;
            }
        }

        let flushed = self.manager.flush();
        info!(height = self.manager.tip().height, "node stopped");
        if let Some(reason) = self.manager.halt_reason() {
            error!(reason, "node halted");
            return Err(ChainError::Halted(reason.to_string()).into());
        }
        flushed?;
        Ok(())
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::SubmitTransaction(tx, reply) => {
                let result = self.manager.submit_transaction(tx);
                if let Err(e) = &result {
                    debug!(reason = e.code(), "transaction refused");
                }
                let _ = reply.send(result);
            }
            Command::ReceiveBlock(block, reply) => {
                let _ = reply.send(self.manager.receive_block(block));
            }
            Command::SubmitEvidence(evidence, reply) => {
                let _ = reply.send(self.manager.submit_evidence(evidence));
            }
        }
    }

    fn tick(&mut self) {
        let height = self.manager.tip().height + 1;
        match self.manager.produce_block_if_selected(height) {
            Ok(Some(block)) => debug!(height, hash = %block.hash(), "produced block"),
            Ok(None) => {}
            Err(e) if e.is_fatal() => error!(height, error = %e, "block production failed"),
            Err(e) => warn!(height, error = %e, "block production failed"),
        }
    }
}

impl NodeHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| NodeError::Stopped)?;
        let result = reply_rx.await.map_err(|_| NodeError::Stopped)?;
        Ok(result?)
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash> {
        self.request(|reply| Command::SubmitTransaction(tx, reply))
            .await
    }

    pub async fn receive_block(&self, block: Block) -> Result<ReceiveOutcome> {
        self.request(|reply| Command::ReceiveBlock(block, reply))
            .await
    }

    pub async fn submit_evidence(&self, evidence: Evidence) -> Result<()> {
        self.request(|reply| Command::SubmitEvidence(evidence, reply))
            .await
    }

    /// Ask the node to stop after its current command.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn reader(&self) -> &ChainReader {
        &self.reader
    }
}

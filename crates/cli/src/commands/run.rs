//! Node command.

use super::config::NodeFile;
use super::keys::load_keypair;
use super::{init_logging, open_chain_with};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use stakechain_chain::{ChainEvent, ChainManager, Node};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Args)]
pub struct RunArgs {
    /// Node config file (TOML)
    #[arg(short, long, default_value = "./node.toml")]
    config: PathBuf,
}

pub fn run(args: RunArgs) -> Result<()> {
    let file = NodeFile::load(&args.config)?;
    init_logging(&file.log_level);

    let keypair = file
        .key_file
        .as_deref()
        .map(load_keypair)
        .transpose()?;
    let manager = open_chain_with(&file.data_dir, |params| file.chain_config(params), keypair)?;
    let block_interval = Duration::from_secs(manager.params().block_interval_secs.max(1));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(serve(manager, block_interval))
}

async fn serve(manager: ChainManager, block_interval: Duration) -> Result<()> {
    let (events_tx, mut events) = mpsc::unbounded_channel::<ChainEvent>();
    let manager = manager.with_events(Arc::new(events_tx));
    let (node, handle) = Node::new(manager, block_interval);
    let mut node = tokio::spawn(node.run());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    tokio::select! {
        result = &mut node => return result.context("Node task panicked")?.map_err(Into::into),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for interrupt");
            }
            info!("interrupt received, shutting down");
        }
    }

    handle.shutdown();
    node.await.context("Node task panicked")??;
    Ok(())
}

fn print_event(event: &ChainEvent) {
    match event {
        ChainEvent::BlockCommitted(block) => println!(
            "  {} {} {}",
            format!("#{}", block.header.height).bright_black(),
            block.hash().to_hex()[..16].bright_yellow(),
            format!(
                "({} txs, producer {})",
                block.transactions.len(),
                block.header.producer.to_hex()
            )
            .bright_black()
        ),
        ChainEvent::ValidatorSlashed { address, height } => println!(
            "  {} {} at #{}",
            "slashed".red().bold(),
            address.to_hex().bright_yellow(),
            height
        ),
        ChainEvent::TransactionAdmitted(_) => {}
    }
}

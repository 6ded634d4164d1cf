//! CLI commands module.

use anyhow::{Context, Result};
use clap::Subcommand;
use stakechain_chain::{ChainConfig, ChainManager};
use stakechain_core::{ChainParams, Keypair};
use stakechain_storage::{BlockStore, Storage};
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod account;
mod block;
mod config;
mod info;
mod init;
mod keygen;
mod keys;
mod run;

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a keypair and save it as a key file
    Keygen(keygen::KeygenArgs),
    /// Write the genesis block from a genesis file
    Init(init::InitArgs),
    /// Run a node until interrupted
    Run(run::RunArgs),
    /// Show chain summary
    Info(info::InfoArgs),
    /// Show a block, or list recent blocks
    Block(block::BlockArgs),
    /// Show an account
    Account(account::AccountArgs),
}

pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Keygen(args) => keygen::run(args),
        Commands::Init(args) => {
            init_logging("warn");
            init::run(args)
        }
        Commands::Run(args) => run::run(args),
        Commands::Info(args) => info::run(args),
        Commands::Block(args) => block::run(args),
        Commands::Account(args) => account::run(args),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub(crate) fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Open an initialized data directory for reading, with the parameters it
/// was created with.
pub(crate) fn open_chain(data_dir: &Path) -> Result<ChainManager> {
    open_chain_with(
        data_dir,
        |params| ChainConfig {
            params,
            ..ChainConfig::default()
        },
        None,
    )
}

/// Open an initialized data directory. Protocol parameters are fixed at
/// genesis, so `configure` builds the local config around the stored ones.
pub(crate) fn open_chain_with(
    data_dir: &Path,
    configure: impl FnOnce(ChainParams) -> ChainConfig,
    keypair: Option<Keypair>,
) -> Result<ChainManager> {
    let storage = Storage::open(data_dir).with_context(|| {
        format!(
            "Failed to open storage at {}. Is a node already running on it?",
            data_dir.display()
        )
    })?;
    let params = BlockStore::new(storage.clone())
        .get_params()?
        .context("Data directory is not initialized. Did you run 'stakechain init'?")?;
    ChainManager::open(storage, configure(params), keypair).context("Failed to open chain")
}

/// Seconds since the epoch as a UTC date.
pub(crate) fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

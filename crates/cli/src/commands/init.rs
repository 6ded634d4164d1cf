//! Initialize chain command.

use super::config::GenesisFile;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use stakechain_chain::ChainManager;
use stakechain_core::{format_amount, BlockHeader};
use stakechain_storage::Storage;
use std::fs;
use std::path::PathBuf;

#[derive(Args)]
pub struct InitArgs {
    /// Genesis file (TOML)
    #[arg(short, long)]
    genesis: PathBuf,

    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,
}

pub fn run(args: InitArgs) -> Result<()> {
    println!("{}", "Initializing stakechain...".bold().cyan());
    println!();

    let file = GenesisFile::load(&args.genesis)?;
    let genesis = file.to_genesis(BlockHeader::current_timestamp())?;

    fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", args.data_dir))?;
    let storage = Storage::open(&args.data_dir).context("Failed to open storage")?;
    println!("{}  Created data directory", "✓".green().bold());

    let hash = ChainManager::init_genesis(&storage, &file.params, &genesis)
        .context("Failed to initialize genesis block")?;
    storage.flush()?;

    println!();
    println!("{}  Created genesis block", "✓".green().bold());
    println!("    Hash:       {}", hash.to_hex().bright_yellow());
    println!("    Height:     {}", "0".bright_cyan());
    println!(
        "    Supply:     {} UNM",
        format_amount(genesis.total_supply()).bright_cyan()
    );

    if !genesis.validators.is_empty() {
        println!();
        println!("{}", "Validators:".bold());
        for (key, stake) in &genesis.validators {
            println!(
                "  {} {} UNM",
                key.to_address().to_hex().bright_yellow(),
                format_amount(*stake)
            );
        }
    }

    println!();
    println!("{}", "Chain initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  • Use {} to start a node",
        "stakechain run --config node.toml".bright_cyan()
    );
    println!(
        "  • Use {} to explore blocks",
        "stakechain block".bright_cyan()
    );

    Ok(())
}

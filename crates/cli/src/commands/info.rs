//! Chain summary command.

use super::{format_timestamp, open_chain};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use stakechain_core::format_amount;
use std::path::PathBuf;

#[derive(Args)]
pub struct InfoArgs {
    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(args: InfoArgs) -> Result<()> {
    let chain = open_chain(&args.data_dir)?;
    let info = chain.get_chain_info()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!();
    println!("{}", "Chain Information:".bold().cyan());
    println!();
    println!("  Height:          {}", info.height.to_string().bright_cyan());
    println!("  Tip Hash:        {}", info.tip_hash.to_hex().bright_yellow());
    println!(
        "  Tip Time:        {}",
        format_timestamp(info.tip_timestamp).bright_black()
    );
    println!(
        "  Finalized:       {}",
        info.finalized_height.to_string().bright_cyan()
    );
    println!(
        "  Supply:          {} UNM",
        format_amount(info.cumulative_supply).bright_cyan()
    );
    println!(
        "  Block Reward:    {} UNM (era {})",
        format_amount(info.current_reward).bright_cyan(),
        info.era
    );
    println!(
        "  Validators:      {}",
        info.active_validators.to_string().bright_cyan()
    );
    println!();

    Ok(())
}

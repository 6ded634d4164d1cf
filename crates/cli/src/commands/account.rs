//! Account query command.

use super::open_chain;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use stakechain_core::{format_amount, Address};
use std::path::PathBuf;

#[derive(Args)]
pub struct AccountArgs {
    /// Account address (hex format)
    address: String,

    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,
}

pub fn run(args: AccountArgs) -> Result<()> {
    let address = Address::from_hex(&args.address)
        .with_context(|| format!("Invalid address format: {}", args.address))?;
    let chain = open_chain(&args.data_dir)?;
    let account = chain.get_account(&address)?;
    let next_height = chain.tip().height + 1;
    let params = chain.params();

    println!();
    println!("{}", "Account Information:".bold().cyan());
    println!();
    println!("  Address:      {}", address.to_hex().bright_yellow());
    println!(
        "  Balance:      {} UNM",
        format_amount(account.balance).bright_cyan()
    );
    println!("  Nonce:        {}", account.nonce.to_string().bright_cyan());
    println!(
        "  Staked:       {} UNM",
        format_amount(account.staked).bright_cyan()
    );
    println!(
        "  Validator:    {}",
        if account.is_eligible(next_height, params.min_validator_stake) {
            "eligible".green()
        } else if account.staked > 0 {
            "not eligible".yellow()
        } else {
            "no".bright_black()
        }
    );
    if let Some(until) = account.cooldown_until {
        println!("  Cooldown:     until #{}", until.to_string().red());
    }
    for entry in &account.unbonding {
        println!(
            "  Unbonding:    {} UNM at #{}",
            format_amount(entry.amount).bright_cyan(),
            entry.release_height
        );
    }
    println!(
        "  Is Contract:  {}",
        if account.is_contract() {
            "Yes".green()
        } else {
            "No".bright_black()
        }
    );
    if let Some(code_hash) = account.code_hash {
        println!("  Code Hash:    {}", code_hash.to_hex().bright_black());
    }
    println!();

    Ok(())
}

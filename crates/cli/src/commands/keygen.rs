//! Key generation command.

use super::keys::save_keypair;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use stakechain_core::Keypair;
use std::path::PathBuf;

#[derive(Args)]
pub struct KeygenArgs {
    /// Where to write the key file
    #[arg(short, long, default_value = "./keys/validator.json")]
    out: PathBuf,
}

pub fn run(args: KeygenArgs) -> Result<()> {
    let keypair = Keypair::generate();
    save_keypair(&args.out, &keypair)?;

    println!("{}", "Generated new keypair:".bold().cyan());
    println!();
    println!("  Address:     {}", keypair.address().to_hex().bright_yellow());
    println!(
        "  Public Key:  {}",
        keypair.public_key.to_hex().bright_black()
    );
    println!();
    println!(
        "{}  Saved to: {}",
        "✓".green().bold(),
        args.out.display().to_string().bright_black()
    );
    println!();
    println!("{}", "Keep your private key safe!".yellow().bold());

    Ok(())
}

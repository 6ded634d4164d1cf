//! stakechain CLI entry point.

use clap::{CommandFactory, Parser};
use colored::Colorize;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "stakechain", version)]
#[command(about = "Proof-of-stake ledger node and explorer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<commands::Commands>,
}

fn main() -> ExitCode {
    let Some(command) = Cli::parse().command else {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };

    match commands::run(command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

//! Block explorer command.

use super::{format_timestamp, open_chain};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use stakechain_chain::{BlockId, BlockStatus};
use stakechain_core::{format_amount, Block, Evidence, TxKind};
use std::path::PathBuf;

#[derive(Args)]
pub struct BlockArgs {
    /// Block height or hash. Lists recent blocks when omitted.
    block_id: Option<BlockId>,

    /// Directory to store blockchain data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Number of blocks to list
    #[arg(short, long, default_value = "10")]
    count: usize,
}

pub fn run(args: BlockArgs) -> Result<()> {
    let chain = open_chain(&args.data_dir)?;

    let Some(id) = args.block_id else {
        println!();
        println!("{}", "Recent Blocks:".bold().cyan());
        println!();
        for block in chain.reader().get_recent_blocks(args.count)? {
            println!(
                "  {} {} {}",
                format!("#{}", block.header.height).bright_black(),
                block.hash().to_hex()[..16].bright_yellow(),
                format!("({} txs)", block.transactions.len()).bright_black()
            );
        }
        println!();
        return Ok(());
    };

    let block = chain
        .get_block(id)?
        .with_context(|| format!("Block not found: {}", id))?;
    let status = chain.block_status(&block.hash())?;
    print_block(&block, status);
    Ok(())
}

fn print_block(block: &Block, status: Option<BlockStatus>) {
    let header = &block.header;
    let status = match status {
        Some(BlockStatus::Finalized) => "finalized".green(),
        Some(BlockStatus::Committed) => "committed".yellow(),
        Some(BlockStatus::Orphaned) => "orphaned".red(),
        Some(BlockStatus::Rejected(code)) => code.red(),
        None => "unknown".bright_black(),
    };

    println!();
    println!("{}", "Block Information:".bold().cyan());
    println!();
    println!("  Height:        {}", header.height.to_string().bright_cyan());
    println!("  Hash:          {}", block.hash().to_hex().bright_yellow());
    println!("  Status:        {}", status);
    println!("  Parent Hash:   {}", header.prev_hash.to_hex().bright_black());
    println!("  Producer:      {}", header.producer.to_hex().bright_yellow());
    println!(
        "  Timestamp:     {}",
        format_timestamp(header.timestamp).bright_black()
    );
    println!("  State Root:    {}", header.state_root.to_hex().bright_black());
    println!("  Tx Root:       {}", header.tx_root.to_hex().bright_black());
    println!(
        "  Transactions:  {}",
        block.transactions.len().to_string().bright_cyan()
    );
    println!();

    if !block.transactions.is_empty() {
        println!("{}", "Transactions:".bold());
        println!();
        for (i, tx) in block.transactions.iter().enumerate() {
            let kind = match tx.kind {
                TxKind::Transfer => "transfer",
                TxKind::Stake => "stake",
                TxKind::Unstake => "unstake",
                TxKind::ContractDeploy => "deploy",
                TxKind::ContractCall => "call",
            };
            println!(
                "  {} {} {:<8} {} UNM (fee {})",
                format!("{}.", i + 1).bright_black(),
                tx.hash().to_hex()[..16].bright_yellow(),
                kind,
                format_amount(tx.amount),
                format_amount(tx.fee)
            );
        }
        println!();
    }

    if !block.evidence.is_empty() {
        println!("{}", "Evidence:".bold());
        println!();
        for evidence in &block.evidence {
            let kind = match evidence {
                Evidence::Equivocation { .. } => "equivocation",
                Evidence::InvalidBlock { .. } => "invalid block",
            };
            println!(
                "  {} {} at #{}",
                kind.red(),
                evidence.offender().to_hex().bright_yellow(),
                evidence.height()
            );
        }
        println!();
    }
}

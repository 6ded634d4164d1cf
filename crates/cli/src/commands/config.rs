//! TOML files read by `init` and `run`.

use anyhow::{Context, Result};
use serde::Deserialize;
use stakechain_chain::{ChainConfig, GenesisConfig, PoolConfig};
use stakechain_core::{parse_amount, Address, ChainParams, PublicKey};
use std::fs;
use std::path::{Path, PathBuf};

/// Genesis file: initial balances, initial validators and the protocol
/// parameters the chain is created with.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenesisFile {
    /// Genesis timestamp in seconds. Defaults to the current time.
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub allocations: Vec<AllocationEntry>,
    #[serde(default)]
    pub validators: Vec<ValidatorEntry>,
    /// Overrides of individual protocol parameters.
    #[serde(default)]
    pub params: ChainParams,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationEntry {
    pub address: String,
    /// Decimal UNM.
    pub amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorEntry {
    pub public_key: String,
    /// Decimal UNM, minted and staked at genesis.
    pub stake: String,
}

impl GenesisFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read genesis file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Invalid genesis file: {}", path.display()))
    }

    pub fn to_genesis(&self, now: u64) -> Result<GenesisConfig> {
        let allocations = self
            .allocations
            .iter()
            .map(|entry| {
                let address = Address::from_hex(&entry.address)
                    .with_context(|| format!("Invalid allocation address: {}", entry.address))?;
                let amount = parse_amount(&entry.amount)
                    .with_context(|| format!("Invalid allocation amount: {}", entry.amount))?;
                Ok((address, amount))
            })
            .collect::<Result<Vec<_>>>()?;

        let validators = self
            .validators
            .iter()
            .map(|entry| {
                let key = PublicKey::from_hex(&entry.public_key).with_context(|| {
                    format!("Invalid validator public key: {}", entry.public_key)
                })?;
                let stake = parse_amount(&entry.stake)
                    .with_context(|| format!("Invalid validator stake: {}", entry.stake))?;
                Ok((key, stake))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GenesisConfig {
            timestamp: self.timestamp.unwrap_or(now),
            allocations,
            validators,
        })
    }
}

/// Node file: where the node keeps its data and how it behaves locally.
/// Protocol parameters are not here; they come from the data directory.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeFile {
    pub data_dir: PathBuf,
    /// Producer key. Without one the node only follows the chain.
    pub key_file: Option<PathBuf>,
    pub log_level: String,
    pub produce_empty_blocks: bool,
    pub pool: PoolSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    pub max_transactions: usize,
    pub max_per_sender: usize,
}

impl Default for NodeFile {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            key_file: None,
            log_level: "info".to_string(),
            produce_empty_blocks: ChainConfig::default().produce_empty_blocks,
            pool: PoolSection::default(),
        }
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            max_transactions: pool.max_transactions,
            max_per_sender: pool.max_per_sender,
        }
    }
}

impl NodeFile {
    /// Load a node file. Relative paths inside it are resolved against the
    /// file's own directory.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read node config: {}", path.display()))?;
        let mut file: Self = toml::from_str(&contents)
            .with_context(|| format!("Invalid node config: {}", path.display()))?;
        if let Some(base) = path.parent() {
            file.data_dir = base.join(&file.data_dir);
            file.key_file = file.key_file.map(|key| base.join(key));
        }
        Ok(file)
    }

    pub fn chain_config(&self, params: ChainParams) -> ChainConfig {
        ChainConfig {
            params,
            pool: PoolConfig {
                max_transactions: self.pool.max_transactions,
                max_per_sender: self.pool.max_per_sender,
            },
            produce_empty_blocks: self.produce_empty_blocks,
        }
    }
}

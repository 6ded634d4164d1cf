//! JSON key files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use stakechain_core::{Address, Keypair};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyFile {
    pub address: String,
    pub public_key: String,
    pub private_key: String,
}

impl KeyFile {
    pub fn from_keypair(keypair: &Keypair) -> Self {
        Self {
            address: keypair.address().to_hex(),
            public_key: keypair.public_key.to_hex(),
            private_key: hex::encode(keypair.private_key()),
        }
    }
}

pub fn save_keypair(path: &Path, keypair: &Keypair) -> Result<()> {
    if path.exists() {
        bail!("Refusing to overwrite existing key file: {}", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&KeyFile::from_keypair(keypair))?;
    fs::write(path, json).with_context(|| format!("Failed to write key file: {}", path.display()))
}

/// Load a key file, checking that the stored address belongs to the key.
pub fn load_keypair(path: &Path) -> Result<Keypair> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file: {}", path.display()))?;
    let file: KeyFile = serde_json::from_str(&contents)
        .with_context(|| format!("Malformed key file: {}", path.display()))?;
    let keypair =
        Keypair::from_private_hex(&file.private_key).context("Invalid private key in key file")?;

    let address = keypair.address();
    if Address::from_hex(&file.address).ok() != Some(address) {
        bail!(
            "Key file address {} does not match its private key ({})",
            file.address,
            address.to_hex()
        );
    }
    Ok(keypair)
}

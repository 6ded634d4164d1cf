//! Block and block header structures.

use crate::crypto::{Address, Keypair, PublicKey, Signature};
use crate::evidence::Evidence;
use crate::hash::{hash_concat, hash_encoded, Hash};
use crate::merkle::merkle_root;
use crate::transaction::{Transaction, TransactionError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Everything the producer signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (0 for genesis).
    pub height: u64,
    /// Hash of the previous block; `Hash::ZERO` for genesis.
    pub prev_hash: Hash,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Selected producer; `Address::ZERO` for genesis.
    pub producer: Address,
    /// Merkle root over transaction hashes.
    pub tx_root: Hash,
    /// Merkle root over evidence hashes.
    pub evidence_root: Hash,
    /// Ledger commitment after applying the block.
    pub state_root: Hash,
}

impl BlockHeader {
    /// Digest the producer signs.
    pub fn signing_hash(&self) -> Hash {
        hash_encoded(self)
    }

    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// A header together with its producer signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHeader {
    pub header: BlockHeader,
    pub signature: Signature,
}

impl SignedHeader {
    /// Same value as [`Block::hash`] for the block this header came from.
    pub fn hash(&self) -> Hash {
        block_hash(&self.header, &self.signature)
    }

    pub fn verify(&self, key: &PublicKey) -> bool {
        key.verify_hash(&self.header.signing_hash(), &self.signature)
            .is_ok()
    }
}

fn block_hash(header: &BlockHeader, signature: &Signature) -> Hash {
    hash_concat(&[header.signing_hash().as_ref(), &signature.0])
}

/// Defects a block can be convicted of without any ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockDefect {
    #[error("transaction root does not match the body")]
    TxRootMismatch,
    #[error("evidence root does not match the body")]
    EvidenceRootMismatch,
    #[error("transaction {tx} is invalid: {reason}")]
    InvalidTransaction { tx: Hash, reason: TransactionError },
    #[error("transaction {0} appears twice")]
    DuplicateTransaction(Hash),
}

impl BlockDefect {
    /// True if the producer's signature covers the defect.
    ///
    /// The signature commits to the header only. A body that disagrees with
    /// the header roots may have been altered by whoever relayed it, so root
    /// mismatches convict nobody.
    pub fn is_attributable(&self) -> bool {
        matches!(
            self,
            BlockDefect::InvalidTransaction { .. } | BlockDefect::DuplicateTransaction(_)
        )
    }
}

/// A block: header, ordered transactions, slashing evidence and the
/// producer's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub evidence: Vec<Evidence>,
    pub signature: Signature,
}

impl Block {
    /// Build an unsigned block, committing to the body in the header.
    pub fn new(
        height: u64,
        prev_hash: Hash,
        timestamp: u64,
        producer: Address,
        transactions: Vec<Transaction>,
        evidence: Vec<Evidence>,
        state_root: Hash,
    ) -> Self {
        let header = BlockHeader {
            height,
            prev_hash,
            timestamp,
            producer,
            tx_root: tx_root(&transactions),
            evidence_root: evidence_root(&evidence),
            state_root,
        };
        Self {
            header,
            transactions,
            evidence,
            signature: Signature::default(),
        }
    }

    /// Block 0: zero parent, zero producer, no signature.
    pub fn genesis(timestamp: u64, state_root: Hash) -> Self {
        Self::new(0, Hash::ZERO, timestamp, Address::ZERO, Vec::new(), Vec::new(), state_root)
    }

    /// Hash of the canonical encoding: header digest and signature.
    pub fn hash(&self) -> Hash {
        block_hash(&self.header, &self.signature)
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.prev_hash == Hash::ZERO
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign_hash(&self.header.signing_hash());
    }

    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.sign(keypair);
        self
    }

    pub fn verify_signature(&self, key: &PublicKey) -> bool {
        key.verify_hash(&self.header.signing_hash(), &self.signature)
            .is_ok()
    }

    pub fn signed_header(&self) -> SignedHeader {
        SignedHeader {
            header: self.header.clone(),
            signature: self.signature,
        }
    }

    /// First state-independent defect in the body, if any.
    pub fn structural_defect(&self) -> Option<BlockDefect> {
        if tx_root(&self.transactions) != self.header.tx_root {
            return Some(BlockDefect::TxRootMismatch);
        }
        if evidence_root(&self.evidence) != self.header.evidence_root {
            return Some(BlockDefect::EvidenceRootMismatch);
        }
        let mut seen = HashSet::with_capacity(self.transactions.len());
        for tx in &self.transactions {
            let tx_hash = tx.hash();
            if !seen.insert(tx_hash) {
                return Some(BlockDefect::DuplicateTransaction(tx_hash));
            }
            if let Err(reason) = tx.verify().and_then(|_| tx.check_shape()) {
                return Some(BlockDefect::InvalidTransaction { tx: tx_hash, reason });
            }
        }
        None
    }
}

pub fn tx_root(transactions: &[Transaction]) -> Hash {
    let hashes: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
    merkle_root(&hashes)
}

pub fn evidence_root(evidence: &[Evidence]) -> Hash {
    let hashes: Vec<Hash> = evidence.iter().map(Evidence::hash).collect();
    merkle_root(&hashes)
}

//! Proofs of producer misbehaviour.
//!
//! Evidence is self-contained: anyone holding the offender's public key can
//! check it without chain state. Whether the offender is still slashable is a
//! ledger question answered elsewhere.

use crate::block::{Block, BlockDefect, SignedHeader};
use crate::crypto::{Address, PublicKey};
use crate::hash::{hash_encoded, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidenceError {
    #[error("headers are at different heights")]
    HeightMismatch,
    #[error("headers name different producers")]
    ProducerMismatch,
    #[error("headers are identical")]
    SameBlock,
    #[error("signature does not verify against the offender's key")]
    BadSignature,
    #[error("block has no structural defect")]
    NoDefect,
    #[error("defect is not covered by the producer's signature: {0}")]
    Unattributable(BlockDefect),
    #[error("genesis cannot be an offence")]
    Genesis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evidence {
    /// Two different signed headers from one producer at one height.
    Equivocation {
        first: SignedHeader,
        second: SignedHeader,
    },
    /// A signed block whose body matches its header roots yet contains a
    /// defect no honest producer would emit.
    InvalidBlock { block: Box<Block> },
}

impl Evidence {
    pub fn equivocation(first: SignedHeader, second: SignedHeader) -> Self {
        // Order the pair so both discoverers produce identical evidence.
        if first.hash() <= second.hash() {
            Evidence::Equivocation { first, second }
        } else {
            Evidence::Equivocation {
                first: second,
                second: first,
            }
        }
    }

    pub fn invalid_block(block: Block) -> Self {
        Evidence::InvalidBlock {
            block: Box::new(block),
        }
    }

    pub fn offender(&self) -> Address {
        match self {
            Evidence::Equivocation { first, .. } => first.header.producer,
            Evidence::InvalidBlock { block } => block.header.producer,
        }
    }

    /// Height at which the offence happened.
    pub fn height(&self) -> u64 {
        match self {
            Evidence::Equivocation { first, .. } => first.header.height,
            Evidence::InvalidBlock { block } => block.header.height,
        }
    }

    pub fn hash(&self) -> Hash {
        hash_encoded(self)
    }

    /// Check the proof against the offender's key.
    pub fn verify(&self, key: &PublicKey) -> Result<(), EvidenceError> {
        if self.height() == 0 {
            return Err(EvidenceError::Genesis);
        }
        match self {
            Evidence::Equivocation { first, second } => {
                if first.header.height != second.header.height {
                    return Err(EvidenceError::HeightMismatch);
                }
                if first.header.producer != second.header.producer {
                    return Err(EvidenceError::ProducerMismatch);
                }
                if first.header == second.header {
                    return Err(EvidenceError::SameBlock);
                }
                if !first.verify(key) || !second.verify(key) {
                    return Err(EvidenceError::BadSignature);
                }
                Ok(())
            }
            Evidence::InvalidBlock { block } => {
                if !block.verify_signature(key) {
                    return Err(EvidenceError::BadSignature);
                }
                match block.structural_defect() {
                    None => Err(EvidenceError::NoDefect),
                    Some(defect) if !defect.is_attributable() => {
                        Err(EvidenceError::Unattributable(defect))
                    }
                    Some(_) => Ok(()),
                }
            }
        }
    }

    /// The defect an invalid-block proof demonstrates.
    pub fn defect(&self) -> Option<BlockDefect> {
        match self {
            Evidence::InvalidBlock { block } => block.structural_defect(),
            Evidence::Equivocation { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::transaction::Transaction;

    fn header_block(kp: &Keypair, height: u64, timestamp: u64) -> Block {
        Block::new(height, Hash::ZERO, timestamp, kp.address(), vec![], vec![], Hash::ZERO)
            .signed(kp)
    }

    #[test]
    fn test_equivocation_verifies() {
        let kp = Keypair::generate();
        let a = header_block(&kp, 3, 10).signed_header();
        let b = header_block(&kp, 3, 11).signed_header();
        let evidence = Evidence::equivocation(a.clone(), b.clone());
        assert_eq!(evidence, Evidence::equivocation(b, a));
        assert_eq!(evidence.offender(), kp.address());
        assert_eq!(evidence.height(), 3);
        assert!(evidence.verify(&kp.public_key).is_ok());
        assert_eq!(
            evidence.verify(&Keypair::generate().public_key),
            Err(EvidenceError::BadSignature)
        );
    }

    #[test]
    fn test_equivocation_needs_two_blocks_at_one_height() {
        let kp = Keypair::generate();
        let a = header_block(&kp, 3, 10).signed_header();
        let same = Evidence::Equivocation {
            first: a.clone(),
            second: a.clone(),
        };
        assert_eq!(same.verify(&kp.public_key), Err(EvidenceError::SameBlock));

        let later = header_block(&kp, 4, 10).signed_header();
        let apart = Evidence::Equivocation {
            first: a,
            second: later,
        };
        assert_eq!(apart.verify(&kp.public_key), Err(EvidenceError::HeightMismatch));
    }

    #[test]
    fn test_invalid_block_evidence() {
        let kp = Keypair::generate();
        let mut forged = Transaction::stake(kp.public_key, 5, 0, 0).signed(&kp);
        forged.amount += 1;
        let block = Block::new(2, Hash::ZERO, 10, kp.address(), vec![forged], vec![], Hash::ZERO)
            .signed(&kp);

        let evidence = Evidence::invalid_block(block);
        assert!(matches!(
            evidence.defect(),
            Some(BlockDefect::InvalidTransaction { .. })
        ));
        assert!(evidence.verify(&kp.public_key).is_ok());

        let clean = Evidence::invalid_block(header_block(&kp, 2, 10));
        assert_eq!(clean.verify(&kp.public_key), Err(EvidenceError::NoDefect));
    }

    #[test]
    fn test_relayed_body_swap_convicts_nobody() {
        let kp = Keypair::generate();
        let tx = Transaction::stake(kp.public_key, 5, 0, 0).signed(&kp);
        let mut block = Block::new(2, Hash::ZERO, 10, kp.address(), vec![], vec![], Hash::ZERO)
            .signed(&kp);
        // The signature still verifies: it never covered the body.
        block.transactions.push(tx);

        let evidence = Evidence::invalid_block(block);
        assert_eq!(
            evidence.verify(&kp.public_key),
            Err(EvidenceError::Unattributable(BlockDefect::TxRootMismatch))
        );
    }
}

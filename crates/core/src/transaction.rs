//! Transaction types and signing.

use crate::crypto::{Address, CryptoError, Keypair, PublicKey, Signature};
use crate::hash::{hash_concat, hash_encoded, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// State-independent reasons a transaction is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("sender {from} is not derived from the signing key")]
    KeyMismatch { from: Address },
    #[error("{0:?} requires a recipient")]
    MissingRecipient(TxKind),
    #[error("{0:?} must not name a recipient")]
    UnexpectedRecipient(TxKind),
    #[error("{0:?} requires a non-zero amount")]
    ZeroAmount(TxKind),
    #[error("contract deployment without code")]
    EmptyCode,
}

impl From<CryptoError> for TransactionError {
    fn from(_: CryptoError) -> Self {
        TransactionError::VerificationFailed
    }
}

/// What a transaction does to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxKind {
    Transfer,
    Stake,
    Unstake,
    ContractDeploy,
    ContractCall,
}

/// A signed ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TxKind,
    /// Sender address; must be derived from `public_key`.
    pub from: Address,
    pub public_key: PublicKey,
    /// Recipient, or the called contract. `None` for stake, unstake and deploy.
    pub to: Option<Address>,
    pub amount: u64,
    pub fee: u64,
    /// Must equal the sender's ledger nonce when applied.
    pub nonce: u64,
    /// Contract code or call data. Opaque to the ledger.
    pub payload: Vec<u8>,
    pub signature: Signature,
}

/// The signed body: every field except the signature.
#[derive(Serialize)]
struct SigningBody<'a> {
    kind: TxKind,
    from: &'a Address,
    public_key: &'a PublicKey,
    to: &'a Option<Address>,
    amount: u64,
    fee: u64,
    nonce: u64,
    payload: &'a [u8],
}

impl Transaction {
    fn unsigned(
        kind: TxKind,
        public_key: PublicKey,
        to: Option<Address>,
        amount: u64,
        fee: u64,
        nonce: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            from: public_key.to_address(),
            public_key,
            to,
            amount,
            fee,
            nonce,
            payload,
            signature: Signature::default(),
        }
    }

    pub fn transfer(public_key: PublicKey, to: Address, amount: u64, fee: u64, nonce: u64) -> Self {
        Self::unsigned(TxKind::Transfer, public_key, Some(to), amount, fee, nonce, Vec::new())
    }

    pub fn stake(public_key: PublicKey, amount: u64, fee: u64, nonce: u64) -> Self {
        Self::unsigned(TxKind::Stake, public_key, None, amount, fee, nonce, Vec::new())
    }

    pub fn unstake(public_key: PublicKey, amount: u64, fee: u64, nonce: u64) -> Self {
        Self::unsigned(TxKind::Unstake, public_key, None, amount, fee, nonce, Vec::new())
    }

    pub fn deploy(public_key: PublicKey, code: Vec<u8>, amount: u64, fee: u64, nonce: u64) -> Self {
        Self::unsigned(TxKind::ContractDeploy, public_key, None, amount, fee, nonce, code)
    }

    pub fn call(
        public_key: PublicKey,
        contract: Address,
        data: Vec<u8>,
        amount: u64,
        fee: u64,
        nonce: u64,
    ) -> Self {
        Self::unsigned(TxKind::ContractCall, public_key, Some(contract), amount, fee, nonce, data)
    }

    /// Hash of the signed body.
    pub fn signing_hash(&self) -> Hash {
        hash_encoded(&SigningBody {
            kind: self.kind,
            from: &self.from,
            public_key: &self.public_key,
            to: &self.to,
            amount: self.amount,
            fee: self.fee,
            nonce: self.nonce,
            payload: &self.payload,
        })
    }

    /// Transaction identifier: hash of the full encoding, signature included.
    pub fn hash(&self) -> Hash {
        hash_encoded(self)
    }

    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign_hash(&self.signing_hash());
    }

    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.sign(keypair);
        self
    }

    /// Check the key binding and the signature.
    pub fn verify(&self) -> Result<(), TransactionError> {
        if self.public_key.to_address() != self.from {
            return Err(TransactionError::KeyMismatch { from: self.from });
        }
        self.public_key
            .verify_hash(&self.signing_hash(), &self.signature)?;
        Ok(())
    }

    /// Check that the fields fit the kind.
    pub fn check_shape(&self) -> Result<(), TransactionError> {
        match self.kind {
            TxKind::Transfer | TxKind::ContractCall if self.to.is_none() => {
                Err(TransactionError::MissingRecipient(self.kind))
            }
            TxKind::Stake | TxKind::Unstake | TxKind::ContractDeploy if self.to.is_some() => {
                Err(TransactionError::UnexpectedRecipient(self.kind))
            }
            TxKind::Stake | TxKind::Unstake if self.amount == 0 => {
                Err(TransactionError::ZeroAmount(self.kind))
            }
            TxKind::ContractDeploy if self.payload.is_empty() => Err(TransactionError::EmptyCode),
            _ => Ok(()),
        }
    }

    /// Amount that leaves the sender's spendable balance. Unstake only pays
    /// the fee; the amount comes out of stake.
    pub fn balance_cost(&self) -> u64 {
        match self.kind {
            TxKind::Unstake => self.fee,
            _ => self.amount.saturating_add(self.fee),
        }
    }

    /// Address of the contract a deployment creates.
    pub fn contract_address(&self) -> Option<Address> {
        if self.kind != TxKind::ContractDeploy {
            return None;
        }
        let digest = hash_concat(&[self.from.as_ref(), &self.nonce.to_be_bytes()]);
        Some(Address::from_hash(&digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Address {
        Address([2u8; 20])
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = Keypair::generate();
        let tx = Transaction::transfer(kp.public_key, recipient(), 1_000, 10, 0).signed(&kp);
        assert_eq!(tx.from, kp.address());
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn test_tampered_amount_fails() {
        let kp = Keypair::generate();
        let mut tx = Transaction::transfer(kp.public_key, recipient(), 1_000, 10, 0).signed(&kp);
        tx.amount = 2_000;
        assert_eq!(tx.verify(), Err(TransactionError::VerificationFailed));
    }

    #[test]
    fn test_foreign_sender_rejected() {
        let kp = Keypair::generate();
        let mut tx = Transaction::transfer(kp.public_key, recipient(), 1, 1, 0);
        tx.from = Address([9u8; 20]);
        let tx = tx.signed(&kp);
        assert!(matches!(tx.verify(), Err(TransactionError::KeyMismatch { .. })));
    }

    #[test]
    fn test_hash_covers_signature() {
        let kp = Keypair::generate();
        let unsigned = Transaction::transfer(kp.public_key, recipient(), 1, 1, 0);
        let signed = unsigned.clone().signed(&kp);
        assert_eq!(unsigned.signing_hash(), signed.signing_hash());
        assert_ne!(unsigned.hash(), signed.hash());
    }

    #[test]
    fn test_shape_rules() {
        let kp = Keypair::generate();
        let pk = kp.public_key;
        assert!(Transaction::stake(pk, 5, 0, 0).check_shape().is_ok());
        assert_eq!(
            Transaction::stake(pk, 0, 0, 0).check_shape(),
            Err(TransactionError::ZeroAmount(TxKind::Stake))
        );
        assert_eq!(
            Transaction::deploy(pk, vec![], 0, 0, 0).check_shape(),
            Err(TransactionError::EmptyCode)
        );
        let mut call = Transaction::call(pk, recipient(), vec![1], 0, 0, 0);
        call.to = None;
        assert_eq!(
            call.check_shape(),
            Err(TransactionError::MissingRecipient(TxKind::ContractCall))
        );
    }

    #[test]
    fn test_balance_cost() {
        let pk = Keypair::generate().public_key;
        assert_eq!(Transaction::transfer(pk, recipient(), 40, 1, 0).balance_cost(), 41);
        assert_eq!(Transaction::stake(pk, 40, 1, 0).balance_cost(), 41);
        assert_eq!(Transaction::unstake(pk, 40, 1, 0).balance_cost(), 1);
        assert_eq!(
            Transaction::transfer(pk, recipient(), u64::MAX, 1, 0).balance_cost(),
            u64::MAX
        );
    }

    #[test]
    fn test_contract_address_depends_on_nonce() {
        let pk = Keypair::generate().public_key;
        let a = Transaction::deploy(pk, vec![1], 0, 0, 0).contract_address();
        let b = Transaction::deploy(pk, vec![2], 0, 0, 0).contract_address();
        let c = Transaction::deploy(pk, vec![1], 0, 0, 1).contract_address();
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Transaction::stake(pk, 1, 0, 0).contract_address(), None);
    }
}

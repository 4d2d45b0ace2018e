use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::crypto::{self, Address, CryptoError, DigitalSignature};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("No signature in this transaction")]
    MissingSignature,

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Wallet address does not match sender address")]
    SenderMismatch,

    #[error("Coinbase transactions carry no signature")]
    CoinbaseNotSignable,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Represents a transaction in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,

    /// Sender's address; `None` for coinbase credits
    pub from_address: Option<Address>,

    /// Recipient's address
    pub to_address: Address,

    /// Amount being transferred
    pub amount: u64,

    /// Timestamp when the transaction was created
    pub timestamp: DateTime<Utc>,

    /// Digital signature of the transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<DigitalSignature>,
}

impl Transaction {
    /// Creates a new unsigned transfer
    ///
    /// # Arguments
    ///
    /// * `from_address` - The address of the sender
    /// * `to_address` - The address of the recipient
    /// * `amount` - The amount to transfer
    ///
    /// # Returns
    ///
    /// A new Transaction instance
    pub fn new(from_address: Address, to_address: Address, amount: u64) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            from_address: Some(from_address),
            to_address,
            amount,
            timestamp: Utc::now(),
            signature: None,
        }
    }

    /// Creates a new coinbase transaction (mining reward or initial credit)
    ///
    /// # Arguments
    ///
    /// * `to_address` - The address being credited
    /// * `amount` - The credited amount
    ///
    /// # Returns
    ///
    /// A new Transaction instance with no sender
    pub fn new_coinbase(to_address: Address, amount: u64) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            from_address: None,
            to_address,
            amount,
            timestamp: Utc::now(),
            signature: None,
        }
    }

    /// Signs the transaction with a wallet
    ///
    /// # Arguments
    ///
    /// * `wallet` - The wallet to sign with; must own the sender address
    ///
    /// # Returns
    ///
    /// Result indicating success or failure
    pub fn sign(&mut self, wallet: &crypto::Wallet) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        self.signature = Some(wallet.sign(self)?);

        Ok(())
    }

    /// Verifies the transaction's signature against its sender
    ///
    /// Coinbase transactions verify unconditionally. A transfer without a
    /// signature is an error rather than a plain rejection.
    pub fn verify_signature(&self) -> Result<bool, TransactionError> {
        let from = match &self.from_address {
            Some(from) => from,
            None => return Ok(true),
        };

        let signature = self
            .signature
            .as_ref()
            .ok_or(TransactionError::MissingSignature)?;

        Ok(crypto::verify(&from.0, self, signature))
    }

    /// Checks if the transaction is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.from_address.is_none()
    }
}

use log::debug;
use thiserror::Error;

use std::fmt;

use super::block::Block;
use super::chain::balance_in;
use super::transaction::{Transaction, TransactionError};

/// Reasons a transaction is refused entry to the pool
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Invalid signature on transaction {0}")]
    InvalidSignature(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: i64 },

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
}

/// Decides whether a transaction may be staged
///
/// Runs with the confirmed chain and the currently pending transactions in
/// view. The ledger calls it under the pool lock.
pub trait AdmissionPolicy: fmt::Debug + Send + Sync {
    fn admit(
        &self,
        transaction: &Transaction,
        chain: &[Block],
        pending: &[Transaction],
    ) -> Result<(), AdmissionError>;
}

/// Stages every transaction unchecked
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl AdmissionPolicy for AcceptAll {
    fn admit(&self, _: &Transaction, _: &[Block], _: &[Transaction]) -> Result<(), AdmissionError> {
        Ok(())
    }
}

/// Requires a valid sender signature and enough unspent balance
///
/// The spendable balance is the confirmed balance minus what the sender
/// already has pending. Coinbase credits pass unchecked.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifiedAdmission;

impl AdmissionPolicy for VerifiedAdmission {
    fn admit(
        &self,
        transaction: &Transaction,
        chain: &[Block],
        pending: &[Transaction],
    ) -> Result<(), AdmissionError> {
        let from = match &transaction.from_address {
            Some(from) => from,
            None => return Ok(()),
        };

        if !transaction.verify_signature()? {
            return Err(AdmissionError::InvalidSignature(transaction.id.clone()));
        }

        let pending_debits = pending
            .iter()
            .filter(|tx| tx.from_address.as_ref() == Some(from))
            .fold(0i64, |total, tx| total.saturating_add(to_signed(tx.amount)));
        let available = balance_in(chain, from).saturating_sub(pending_debits);

        if available < to_signed(transaction.amount) {
            debug!("Sender {} has {} spendable, needs {}", from, available, transaction.amount);
            return Err(AdmissionError::InsufficientFunds {
                required: transaction.amount,
                available,
            });
        }

        Ok(())
    }
}

pub(crate) fn to_signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

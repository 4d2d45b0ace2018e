use parking_lot::Mutex;

use std::sync::Arc;

use super::transaction::Transaction;

/// Ordered, unbounded staging area for unconfirmed transactions
///
/// Clones share the same underlying queue.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    pending: Arc<Mutex<Vec<Transaction>>>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transaction without any validation
    pub fn submit(&self, transaction: Transaction) {
        self.pending.lock().push(transaction);
    }

    /// Appends a transaction if `check` accepts it
    ///
    /// The check sees the currently pending transactions and runs under the
    /// pool lock, so no other submission can interleave between the check and
    /// the append.
    pub fn submit_if<E, F>(&self, transaction: Transaction, check: F) -> Result<(), E>
    where
        F: FnOnce(&Transaction, &[Transaction]) -> Result<(), E>,
    {
        let mut pending = self.pending.lock();
        check(&transaction, &pending)?;
        pending.push(transaction);
        Ok(())
    }

    /// Removes and returns the first `count` pending transactions, in order
    ///
    /// `drain(len())` empties the pool. Anything submitted after the
    /// transactions being drained stays pending.
    pub fn drain(&self, count: usize) -> Vec<Transaction> {
        let mut pending = self.pending.lock();
        let count = count.min(pending.len());
        pending.drain(..count).collect()
    }

    /// Snapshot of the pending transactions, in submission order
    pub fn pending(&self) -> Vec<Transaction> {
        self.pending.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

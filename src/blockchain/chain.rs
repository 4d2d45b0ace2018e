use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use std::sync::Arc;
use std::time::Instant;

use super::admission::{to_signed, AdmissionError, AdmissionPolicy};
use super::block::Block;
use super::crypto::Address;
use super::miner::{CancelToken, Miner, MiningError, MiningState};
use super::pool::TransactionPool;
use super::transaction::{Transaction, TransactionError};
use crate::config::LedgerConfig;

/// Number of leading zero hex digits a block hash must carry
pub const DEFAULT_DIFFICULTY: usize = 2;

/// Credits paid to the miner of each block
pub const DEFAULT_MINING_REWARD: u64 = 100;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Chain is empty; the genesis block is missing")]
    EmptyChain,

    #[error("Transaction rejected: {0}")]
    Rejected(#[from] AdmissionError),

    #[error("Mining error: {0}")]
    MiningError(#[from] MiningError),
}

/// Summary counters over the chain and pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainStats {
    pub total_blocks: usize,
    pub total_transactions: usize,
    pub pending_transactions: usize,
    pub difficulty: usize,
    pub is_valid: bool,
}

/// A problem found by [`audit_chain`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuditIssue {
    HashMismatch,
    BrokenLink,
    DifficultyNotMet,
    MissingSignature { transaction_id: String },
    InvalidSignature { transaction_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditFinding {
    pub index: u64,
    pub issue: AuditIssue,
}

/// Result of a full audit, including checks [`is_chain_valid`] skips
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainAudit {
    pub findings: Vec<AuditFinding>,
}

impl ChainAudit {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Represents the ledger: a genesis-rooted chain plus its pending pool
///
/// Clones share the same chain and pool.
#[derive(Debug, Clone)]
pub struct Ledger {
    /// The chain of blocks
    chain: Arc<RwLock<Vec<Block>>>,

    /// Pending transactions to be included in the next block
    pool: TransactionPool,

    /// Proof-of-work search at the ledger's difficulty
    miner: Miner,

    /// Held for the whole of a mine so only one search runs per ledger
    mining_lock: Arc<tokio::sync::Mutex<()>>,

    /// Check applied before a transaction is staged
    admission: Arc<dyn AdmissionPolicy>,

    /// Mining reward
    mining_reward: u64,
}

impl Ledger {
    /// Creates a new ledger with a genesis block and default settings
    pub fn new() -> Self {
        Self::with_config(&LedgerConfig::default())
    }

    /// Creates a new ledger with a genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - Difficulty, mining reward and admission mode
    ///
    /// # Returns
    ///
    /// A new Ledger instance
    pub fn with_config(config: &LedgerConfig) -> Self {
        let genesis = Self::create_genesis(config.difficulty);
        info!("Created genesis block {}", genesis.hash);

        Ledger {
            chain: Arc::new(RwLock::new(vec![genesis])),
            pool: TransactionPool::new(),
            miner: Miner::new(config.difficulty),
            mining_lock: Arc::new(tokio::sync::Mutex::new(())),
            admission: config.admission.policy(),
            mining_reward: config.mining_reward,
        }
    }

    /// Replaces the admission policy
    pub fn with_admission<P: AdmissionPolicy + 'static>(mut self, policy: P) -> Self {
        self.admission = Arc::new(policy);
        self
    }

    /// Creates the genesis block (first block in the chain)
    pub fn create_genesis(difficulty: usize) -> Block {
        Block::genesis(difficulty)
    }

    pub fn difficulty(&self) -> usize {
        self.miner.difficulty()
    }

    pub fn mining_reward(&self) -> u64 {
        self.mining_reward
    }

    /// State of the most recent mining attempt
    pub fn mining_state(&self) -> MiningState {
        self.miner.state()
    }

    /// Gets the last block in the chain
    pub fn latest(&self) -> Result<Block, LedgerError> {
        self.chain.read().last().cloned().ok_or(LedgerError::EmptyChain)
    }

    /// Gets the block at `index`, if any
    pub fn block(&self, index: u64) -> Option<Block> {
        let index = usize::try_from(index).ok()?;
        self.chain.read().get(index).cloned()
    }

    /// Gets the entire chain
    pub fn chain(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    /// Gets all pending transactions, in staging order
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pool.pending()
    }

    /// Adds a transaction to the pending pool
    ///
    /// The admission policy decides; the default accepts everything.
    ///
    /// # Arguments
    ///
    /// * `transaction` - The transaction to stage
    ///
    /// # Returns
    ///
    /// Result indicating whether the transaction was staged
    pub fn stage_transaction(&self, transaction: Transaction) -> Result<(), LedgerError> {
        let chain = self.chain.read();
        let id = transaction.id.clone();

        self.pool
            .submit_if(transaction, |tx, pending| self.admission.admit(tx, &chain, pending))
            .map_err(|err| {
                warn!("Rejected transaction {}: {}", id, err);
                LedgerError::from(err)
            })?;

        debug!("Staged transaction {}", id);
        Ok(())
    }

    /// Mines a new block from the pending transactions
    ///
    /// Returns `Ok(None)` without side effects when nothing is pending.
    /// Otherwise the pending transactions present now, plus a reward for
    /// `miner_address`, are sealed into a block on top of the current tip.
    /// Only once the seal succeeds are those transactions removed from the
    /// pool and the block appended. Transactions staged during the search stay
    /// pending.
    ///
    /// Cancelling `cancel`, or dropping the returned future, aborts the search
    /// and leaves the chain and pool exactly as they were.
    pub async fn mine_pending(
        &self,
        miner_address: &Address,
        cancel: &CancelToken,
    ) -> Result<Option<Block>, LedgerError> {
        let _mining = self.mining_lock.lock().await;

        let mut transactions = self.pool.pending();
        if transactions.is_empty() {
            debug!("No pending transactions to mine");
            return Ok(None);
        }
        let included = transactions.len();

        transactions.push(Transaction::new_coinbase(
            miner_address.clone(),
            self.mining_reward,
        ));

        let (index, previous_hash) = {
            let chain = self.chain.read();
            let last_block = chain.last().ok_or(LedgerError::EmptyChain)?;
            (chain.len() as u64, last_block.hash.clone())
        };

        let candidate = Block::new(index, transactions, previous_hash, self.difficulty());
        info!(
            "Mining block {} with {} transactions at difficulty {}",
            index,
            included + 1,
            self.difficulty()
        );

        let started = Instant::now();
        let block = match self.miner.spawn(candidate, cancel).wait().await {
            Ok(block) => block,
            Err(err) => {
                warn!("Mining of block {} aborted: {}", index, err);
                return Err(err.into());
            }
        };

        {
            let mut chain = self.chain.write();
            let drained = self.pool.drain(included);
            debug_assert_eq!(drained.len(), included);
            chain.push(block.clone());
        }

        info!(
            "Block {} sealed with nonce {} in {:?}: {}",
            block.index,
            block.nonce,
            started.elapsed(),
            block.hash
        );

        Ok(Some(block))
    }

    /// Computes an address's balance by walking every confirmed transaction
    pub fn balance_of(&self, address: &Address) -> i64 {
        balance_in(&self.chain.read(), address)
    }

    /// Validates hash-chain integrity
    ///
    /// # Returns
    ///
    /// true if every block's hash matches its content and links to its
    /// predecessor, false otherwise
    pub fn is_valid(&self) -> bool {
        is_chain_valid(&self.chain.read())
    }

    /// Full audit: structure, difficulty and signatures
    pub fn audit(&self) -> ChainAudit {
        audit_chain(&self.chain.read())
    }

    pub fn stats(&self) -> ChainStats {
        let chain = self.chain.read();

        ChainStats {
            total_blocks: chain.len(),
            total_transactions: chain.iter().map(|block| block.transactions.len()).sum(),
            pending_transactions: self.pool.len(),
            difficulty: self.difficulty(),
            is_valid: is_chain_valid(&chain),
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

/// Sum of credits minus debits for `address` across `chain`
pub(crate) fn balance_in(chain: &[Block], address: &Address) -> i64 {
    chain
        .iter()
        .flat_map(|block| &block.transactions)
        .fold(0i64, |mut balance, transaction| {
            if transaction.from_address.as_ref() == Some(address) {
                balance = balance.saturating_sub(to_signed(transaction.amount));
            }
            if &transaction.to_address == address {
                balance = balance.saturating_add(to_signed(transaction.amount));
            }
            balance
        })
}

/// Checks hash and link integrity of every block after genesis
///
/// Does not re-check proof of work or transaction signatures; see
/// [`audit_chain`] for that.
pub fn is_chain_valid(chain: &[Block]) -> bool {
    for pair in chain.windows(2) {
        let (previous_block, current_block) = (&pair[0], &pair[1]);

        if current_block.hash != current_block.calculate_hash() {
            warn!("Block {} hash does not match its content", current_block.index);
            return false;
        }

        if current_block.previous_hash != previous_block.hash {
            warn!("Block {} does not link to block {}", current_block.index, previous_block.index);
            return false;
        }
    }

    true
}

/// Reports every integrity, difficulty and signature problem in `chain`
pub fn audit_chain(chain: &[Block]) -> ChainAudit {
    let mut findings = Vec::new();

    for pair in chain.windows(2) {
        let (previous_block, current_block) = (&pair[0], &pair[1]);
        let mut report = |issue: AuditIssue| {
            findings.push(AuditFinding {
                index: current_block.index,
                issue,
            })
        };

        if current_block.hash != current_block.calculate_hash() {
            report(AuditIssue::HashMismatch);
        }
        if current_block.previous_hash != previous_block.hash {
            report(AuditIssue::BrokenLink);
        }
        if !current_block.meets_difficulty() {
            report(AuditIssue::DifficultyNotMet);
        }

        for transaction in &current_block.transactions {
            let transaction_id = transaction.id.clone();
            match transaction.verify_signature() {
                Ok(true) => {}
                Err(TransactionError::MissingSignature) => {
                    report(AuditIssue::MissingSignature { transaction_id })
                }
                Ok(false) | Err(_) => report(AuditIssue::InvalidSignature { transaction_id }),
            }
        }
    }

    ChainAudit { findings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::admission::VerifiedAdmission;
    use crate::blockchain::crypto::Wallet;

    use std::time::Duration;

    async fn mine(ledger: &Ledger, miner: &Wallet) -> Option<Block> {
        ledger
            .mine_pending(miner.address(), &CancelToken::new())
            .await
            .unwrap()
    }

    #[test]
    fn test_new_ledger() {
        let ledger = Ledger::new();
        let chain = ledger.chain();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].index, 0);
        assert_eq!(chain[0].previous_hash, "0");
        assert!(chain[0].transactions.is_empty());
        assert_eq!(ledger.difficulty(), DEFAULT_DIFFICULTY);
        assert_eq!(ledger.mining_reward(), DEFAULT_MINING_REWARD);
        assert_eq!(ledger.mining_state(), MiningState::Idle);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_latest_on_empty_chain() {
        let ledger = Ledger::new();
        ledger.chain.write().clear();

        assert!(matches!(ledger.latest(), Err(LedgerError::EmptyChain)));
    }

    #[tokio::test]
    async fn test_mine_empty_pool_is_noop() {
        let ledger = Ledger::new();
        let miner = Wallet::new();

        assert!(mine(&ledger, &miner).await.is_none());
        assert_eq!(ledger.chain().len(), 1);
        assert_eq!(ledger.balance_of(miner.address()), 0);
    }

    #[tokio::test]
    async fn test_mine_block() {
        let ledger = Ledger::new();
        let sender = Wallet::new();
        let recipient = Wallet::new();
        let miner = Wallet::new();

        ledger
            .stage_transaction(Transaction::new_coinbase(sender.address().clone(), 1000))
            .unwrap();
        let mut transfer = Transaction::new(sender.address().clone(), recipient.address().clone(), 50);
        transfer.sign(&sender).unwrap();
        ledger.stage_transaction(transfer).unwrap();

        let block = mine(&ledger, &miner).await.unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.transactions.len(), 3); // two staged + mining reward
        assert!(block.transactions[2].is_coinbase());
        assert_eq!(block.previous_hash, ledger.chain()[0].hash);
        assert!(block.hash.starts_with(&"0".repeat(DEFAULT_DIFFICULTY)));
        assert_eq!(block.hash, block.calculate_hash());
        assert_eq!(block.difficulty, DEFAULT_DIFFICULTY);

        assert!(ledger.pending_transactions().is_empty());
        assert_eq!(ledger.latest().unwrap(), block);
        assert_eq!(ledger.block(1), Some(block));
        assert_eq!(ledger.block(2), None);

        assert_eq!(ledger.balance_of(sender.address()), 950);
        assert_eq!(ledger.balance_of(recipient.address()), 50);
        assert_eq!(ledger.balance_of(miner.address()), 100);
        assert_eq!(ledger.mining_state(), MiningState::Sealed);
    }

    #[tokio::test]
    async fn test_ledger_validity_and_tampering() {
        let ledger = Ledger::new();
        let wallet = Wallet::new();

        for amount in [10, 20] {
            ledger
                .stage_transaction(Transaction::new_coinbase(wallet.address().clone(), amount))
                .unwrap();
            mine(&ledger, &wallet).await.unwrap();
        }
        assert!(ledger.is_valid());
        assert!(ledger.audit().is_clean());

        ledger.chain.write()[1].transactions[0].amount = 5000;

        assert!(!ledger.is_valid());
        assert!(!ledger.stats().is_valid);
        assert_eq!(
            ledger.audit().findings,
            vec![AuditFinding {
                index: 1,
                issue: AuditIssue::HashMismatch
            }]
        );
    }

    #[tokio::test]
    async fn test_cancelled_mine_leaves_state_untouched() {
        let config = LedgerConfig {
            difficulty: 64,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_config(&config);
        let wallet = Wallet::new();
        ledger
            .stage_transaction(Transaction::new_coinbase(wallet.address().clone(), 10))
            .unwrap();

        let chain_before = ledger.chain();
        let pending_before = ledger.pending_transactions();

        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = ledger.mine_pending(wallet.address(), &cancel).await;

        assert!(matches!(
            result,
            Err(LedgerError::MiningError(MiningError::Cancelled))
        ));
        assert_eq!(ledger.chain(), chain_before);
        assert_eq!(ledger.pending_transactions(), pending_before);
        assert_eq!(ledger.mining_state(), MiningState::Aborted);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_cancellation() {
        let config = LedgerConfig {
            difficulty: 64,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_config(&config);
        let wallet = Wallet::new();
        ledger
            .stage_transaction(Transaction::new_coinbase(wallet.address().clone(), 10))
            .unwrap();
        let pending_before = ledger.pending_transactions();

        let cancel = CancelToken::new();
        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            ledger.mine_pending(wallet.address(), &cancel),
        )
        .await;

        assert!(timed_out.is_err());
        assert_eq!(ledger.chain().len(), 1);
        assert_eq!(ledger.pending_transactions(), pending_before);
    }

    #[tokio::test]
    async fn test_staging_during_mine_waits_for_next_block() {
        let config = LedgerConfig {
            difficulty: 3,
            ..LedgerConfig::default()
        };
        let ledger = Ledger::with_config(&config);
        let wallet = Wallet::new();
        ledger
            .stage_transaction(Transaction::new_coinbase(wallet.address().clone(), 1))
            .unwrap();

        let mining = {
            let ledger = ledger.clone();
            let address = wallet.address().clone();
            tokio::spawn(async move { ledger.mine_pending(&address, &CancelToken::new()).await })
        };
        tokio::task::yield_now().await;
        let late = Transaction::new_coinbase(wallet.address().clone(), 2);
        ledger.stage_transaction(late.clone()).unwrap();

        let block = mining.await.unwrap().unwrap().unwrap();
        let pending = ledger.pending_transactions();

        // The late transaction lands in exactly one place
        let in_block = block.transactions.iter().any(|tx| tx.id == late.id);
        let in_pool = pending.iter().any(|tx| tx.id == late.id);
        assert!(in_block ^ in_pool);
    }

    #[test]
    fn test_verified_admission_rejects_overspend() {
        let ledger = Ledger::new().with_admission(VerifiedAdmission);
        let sender = Wallet::new();
        let recipient = Wallet::new();

        let mut transfer = Transaction::new(sender.address().clone(), recipient.address().clone(), 50);
        transfer.sign(&sender).unwrap();

        assert!(matches!(
            ledger.stage_transaction(transfer),
            Err(LedgerError::Rejected(AdmissionError::InsufficientFunds { .. }))
        ));
        assert!(ledger.pending_transactions().is_empty());
    }

    #[test]
    fn test_open_admission_accepts_unsigned_transfer() {
        let ledger = Ledger::new();
        let sender = Wallet::new();
        let recipient = Wallet::new();

        let transfer = Transaction::new(sender.address().clone(), recipient.address().clone(), 50);
        ledger.stage_transaction(transfer).unwrap();

        assert_eq!(ledger.pending_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_audit_flags_unsigned_transfers() {
        let ledger = Ledger::new();
        let sender = Wallet::new();
        let recipient = Wallet::new();

        let transfer = Transaction::new(sender.address().clone(), recipient.address().clone(), 5);
        let transfer_id = transfer.id.clone();
        ledger.stage_transaction(transfer).unwrap();
        mine(&ledger, &sender).await.unwrap();

        // Structurally sound, but the audit sees the missing signature
        assert!(ledger.is_valid());
        assert_eq!(
            ledger.audit().findings,
            vec![AuditFinding {
                index: 1,
                issue: AuditIssue::MissingSignature {
                    transaction_id: transfer_id
                }
            }]
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let ledger = Ledger::new();
        let wallet = Wallet::new();

        ledger
            .stage_transaction(Transaction::new_coinbase(wallet.address().clone(), 1))
            .unwrap();
        mine(&ledger, &wallet).await.unwrap();
        ledger
            .stage_transaction(Transaction::new_coinbase(wallet.address().clone(), 2))
            .unwrap();

        assert_eq!(
            ledger.stats(),
            ChainStats {
                total_blocks: 2,
                total_transactions: 2,
                pending_transactions: 1,
                difficulty: DEFAULT_DIFFICULTY,
                is_valid: true,
            }
        );
    }
}

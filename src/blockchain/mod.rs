// Blockchain module
//
// This module contains the core ledger implementation including:
// - Block structure and content hashing
// - Ledger (chain, balances, validation)
// - Transaction structure and the pending pool
// - Cryptography utilities
// - Admission policies
// - Proof of work search

pub mod admission;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod miner;
pub mod pool;
pub mod transaction;

// Re-export main components for easier access
pub use admission::{AcceptAll, AdmissionError, AdmissionPolicy, VerifiedAdmission};
pub use block::{content_hash, Block};
pub use chain::{audit_chain, is_chain_valid, ChainAudit, ChainStats, Ledger, LedgerError};
pub use crypto::{Address, DigitalSignature, KeyPair, Wallet};
pub use miner::{CancelToken, Miner, MiningError, MiningState};
pub use pool::TransactionPool;
pub use transaction::{Transaction, TransactionError};

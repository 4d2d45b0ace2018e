//! A single-node, in-memory proof-of-work ledger.
//!
//! Transactions are staged in a pool, sealed into blocks by a cancellable
//! nonce search, and appended to a hash-linked chain. Balances and validity
//! are derived by walking the chain.

pub mod blockchain;
pub mod config;

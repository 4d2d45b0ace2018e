use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::transaction::Transaction;

/// Previous-hash sentinel recorded on the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Represents a block in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was assembled
    pub timestamp: DateTime<Utc>,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Hash of the current block, set once the nonce search converges
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,

    /// Proof of work
    pub nonce: u64,

    /// Difficulty in effect when the block was sealed
    pub difficulty: usize,
}

impl Block {
    /// Creates an unsealed candidate block
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `transactions` - The list of transactions to include in the block
    /// * `previous_hash` - The hash of the previous block
    /// * `difficulty` - The difficulty the block will be mined at
    ///
    /// # Returns
    ///
    /// A new Block with `nonce = 0` and an empty hash
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        difficulty: usize,
    ) -> Self {
        Block {
            index,
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            hash: String::new(),
            nonce: 0,
            difficulty,
        }
    }

    /// Creates the genesis block (first block in the chain)
    ///
    /// The genesis block is hashed but never mined.
    pub fn genesis(difficulty: usize) -> Self {
        let block = Block::new(0, Vec::new(), GENESIS_PREVIOUS_HASH.to_string(), difficulty);
        let hash = block.calculate_hash();

        Block { hash, ..block }
    }

    /// Calculates the content hash of the block
    pub fn calculate_hash(&self) -> String {
        content_hash(self)
    }

    /// Whether the recorded hash satisfies the block's difficulty
    pub fn meets_difficulty(&self) -> bool {
        meets_difficulty(&self.hash, self.difficulty)
    }
}

/// SHA-256 over the block's canonical fields, as lowercase hex
///
/// Covers `index`, `previous_hash`, `timestamp`, `transactions` and `nonce`.
/// The recorded `hash` and `difficulty` are not part of the input. Keys of the
/// JSON object are emitted in sorted order and transactions keep their order.
pub fn content_hash(block: &Block) -> String {
    let block_data = serde_json::json!({
        "index": block.index,
        "previous_hash": block.previous_hash,
        "timestamp": block.timestamp,
        "transactions": block.transactions,
        "nonce": block.nonce,
    });

    let mut hasher = Sha256::new();
    hasher.update(block_data.to_string().as_bytes());

    format!("{:x}", hasher.finalize())
}

/// Checks that the first `difficulty` hex digits of `hash` are all `0`
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

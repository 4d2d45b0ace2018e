//! Proof-of-work search.
//!
//! A search runs on tokio's blocking pool so the caller's executor stays
//! responsive. It checks its [`CancelToken`] between batches of nonce
//! attempts; a cancelled search hands back nothing and mutates nothing
//! outside the candidate it was given.

use log::debug;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::block::{meets_difficulty, Block};

/// Nonce attempts between cancellation checks.
const BATCH_SIZE: u64 = 1024;

/// Errors that can occur while sealing a block
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Mining cancelled before a valid nonce was found")]
    Cancelled,

    #[error("Nonce space exhausted at difficulty {0}")]
    NonceSpaceExhausted(usize),

    #[error("Mining worker failed: {0}")]
    WorkerFailed(String),
}

/// Lifecycle of a miner's most recent search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningState {
    Idle,
    Searching,
    Sealed,
    Aborted,
}

/// Cooperative cancellation flag shared between a caller and a search
///
/// A child token is cancelled when either it or its parent is; cancelling the
/// child leaves the parent alone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self
                .parent
                .as_ref()
                .map_or(false, |parent| parent.load(Ordering::Relaxed))
    }

    pub fn child_token(&self) -> CancelToken {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(self.flag.clone()),
        }
    }
}

/// Single-stream proof-of-work miner at a fixed difficulty
#[derive(Debug, Clone)]
pub struct Miner {
    difficulty: usize,
    state: Arc<Mutex<MiningState>>,
}

impl Miner {
    pub fn new(difficulty: usize) -> Self {
        Miner {
            difficulty,
            state: Arc::new(Mutex::new(MiningState::Idle)),
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// State of the most recent search started through [`Miner::spawn`]
    pub fn state(&self) -> MiningState {
        *self.state.lock()
    }

    /// Runs the nonce search on the current thread
    ///
    /// # Arguments
    ///
    /// * `block` - The candidate; its nonce is reset to 0 and its difficulty
    ///   set to the miner's
    /// * `cancel` - Checked before every batch of attempts
    ///
    /// # Returns
    ///
    /// The sealed block, whose `hash` equals its content hash and meets the
    /// difficulty
    pub fn search(&self, mut block: Block, cancel: &CancelToken) -> Result<Block, MiningError> {
        block.nonce = 0;
        block.difficulty = self.difficulty;

        loop {
            if cancel.is_cancelled() {
                debug!("Search for block {} cancelled at nonce {}", block.index, block.nonce);
                return Err(MiningError::Cancelled);
            }

            for _ in 0..BATCH_SIZE {
                let hash = block.calculate_hash();
                if meets_difficulty(&hash, self.difficulty) {
                    block.hash = hash;
                    return Ok(block);
                }

                block.nonce = block
                    .nonce
                    .checked_add(1)
                    .ok_or(MiningError::NonceSpaceExhausted(self.difficulty))?;
            }
        }
    }

    /// Starts the search on tokio's blocking pool
    ///
    /// Must be called from within a tokio runtime. The job is cancelled when
    /// `cancel` is, when [`MiningJob::cancel`] is called, or when the job is
    /// dropped before completing.
    pub fn spawn(&self, block: Block, cancel: &CancelToken) -> MiningJob {
        let token = cancel.child_token();
        *self.state.lock() = MiningState::Searching;

        let miner = self.clone();
        let worker_token = token.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let result = miner.search(block, &worker_token);
            *miner.state.lock() = match result {
                Ok(_) => MiningState::Sealed,
                Err(_) => MiningState::Aborted,
            };
            result
        });

        MiningJob {
            token,
            handle: Some(handle),
        }
    }
}

/// Handle on an in-flight search
#[derive(Debug)]
pub struct MiningJob {
    token: CancelToken,
    handle: Option<JoinHandle<Result<Block, MiningError>>>,
}

impl MiningJob {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the search to seal the block or abort
    pub async fn wait(mut self) -> Result<Block, MiningError> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| MiningError::WorkerFailed("job already awaited".to_string()))?;

        // The handle stays in place while awaiting so that dropping this
        // future still cancels the search.
        let joined = handle.await;
        self.handle = None;

        joined.map_err(|e| MiningError::WorkerFailed(e.to_string()))?
    }
}

impl Drop for MiningJob {
    fn drop(&mut self) {
        // Still running: nobody will collect the result.
        if self.handle.is_some() {
            self.token.cancel();
        }
    }
}

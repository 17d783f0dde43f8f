//! Mining engine
//!
//! Searches nonces for a candidate block until its hash meets the current
//! difficulty. The search runs without access to the chain and can be
//! cancelled between any two attempts.

use crate::core::{Block, Transaction};
use crate::crypto::hex_meets_difficulty;
use log::info;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

impl MiningStats {
    fn new(hash_attempts: u64, started: Instant) -> Self {
        let time_ms = started.elapsed().as_millis();
        let hash_rate = if time_ms > 0 {
            hash_attempts as f64 / (time_ms as f64 / 1000.0)
        } else {
            hash_attempts as f64
        };
        Self {
            hash_attempts,
            time_ms,
            hash_rate,
        }
    }
}

/// Result of one nonce search
#[derive(Debug)]
pub enum MineOutcome {
    Mined(Block, MiningStats),
    /// Cancelled before a solution was found
    Aborted,
}

/// Proof-of-work searcher for one node
pub struct Miner {
    miner_id: String,
    difficulty: AtomicU32,
    cancel: AtomicBool,
}

impl Miner {
    pub fn new(miner_id: &str, difficulty: u32) -> Self {
        Self {
            miner_id: miner_id.to_string(),
            difficulty: AtomicU32::new(difficulty),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn miner_id(&self) -> &str {
        &self.miner_id
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty.load(Ordering::Relaxed)
    }

    /// Difficulty used by the next call to [`Miner::mine_block`]
    pub fn set_difficulty(&self, difficulty: u32) {
        self.difficulty.store(difficulty, Ordering::Relaxed);
    }

    /// Ask a running search to stop at its next attempt
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation before starting a new search
    pub fn reset(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Search for a nonce that makes the block at `index` valid.
    ///
    /// The candidate is stamped with the current time and the current
    /// difficulty. Cancellation is observed before every attempt.
    pub fn mine_block(
        &self,
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: String,
    ) -> MineOutcome {
        let started = Instant::now();
        let mut block = Block::new(
            index,
            previous_hash,
            transactions,
            self.difficulty(),
            &self.miner_id,
        );

        info!(
            "Mining block {} with difficulty {}...",
            block.index, block.difficulty
        );

        // Constant for the whole search
        let digest = block.transactions_digest();
        let mut attempts = 0u64;

        for nonce in 0..=u64::MAX {
            if self.cancel.load(Ordering::Relaxed) {
                info!("Mining of block {} aborted after {} attempts", index, attempts);
                return MineOutcome::Aborted;
            }

            attempts += 1;
            let hash = block.hash_with(nonce, &digest);
            if hex_meets_difficulty(&hash, block.difficulty) {
                block.nonce = nonce;
                block.hash = hash;

                let stats = MiningStats::new(attempts, started);
                info!(
                    "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
                    block.index, stats.time_ms, attempts, stats.hash_rate
                );
                return MineOutcome::Mined(block, stats);
            }
        }

        log::warn!("Nonce space exhausted for block {}", index);
        MineOutcome::Aborted
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Everything one mining run needs
#[derive(Debug, Clone)]
pub struct MiningJob {
    pub epoch_index: u32,
    pub seed: [u8; 32],
    /// Raw farmer key bytes
    pub identity: [u8; 32],
    pub duration: Duration,
}

/// Progress report emitted after every chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningProgress {
    /// 0..=100
    pub percent: u8,
    pub best_zero_count: u32,
    pub hash_attempts: u64,
}

/// Best hash found by one mining run. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MiningResult {
    pub best_nonce: u64,
    pub best_hash: [u8; 32],
    pub best_zero_count: u32,
    pub hash_attempts: u64,
    pub time_taken_ms: u64,
}

impl MiningResult {
    pub fn to_hex(&self) -> String {
        hex::encode(self.best_hash)
    }

    pub fn hashrate(&self) -> f64 {
        if self.time_taken_ms == 0 {
            return 0.0;
        }
        (self.hash_attempts as f64) / (self.time_taken_ms as f64 / 1000.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("mining finished without computing a single hash")]
    NoHashes,
}

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::hash::{compute_hash, count_leading_zero_nibbles};
use super::solution::{MiningError, MiningJob, MiningProgress, MiningResult};

/// Wall-clock budget of one chunk between yields
pub const DEFAULT_CHUNK: Duration = Duration::from_millis(100);

// Constants for performance tuning
const CLOCK_CHECK_INTERVAL: u64 = 64;

/// Yield point between mining chunks.
///
/// Keeps the mining loop independent of the host event loop.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn yield_now(&self);
}

/// Yields back to the tokio scheduler
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn yield_now(&self) {
        tokio::task::yield_now().await;
    }
}

/// Anything that can run a time-boxed proof search
#[async_trait]
pub trait ProofMiner: Send + Sync {
    async fn mine(
        &self,
        job: &MiningJob,
        on_progress: &mut (dyn FnMut(MiningProgress) + Send),
    ) -> Result<MiningResult, MiningError>;
}

/// Chunked, cooperative proof-of-work loop.
///
/// Always consumes the full time budget; there is no early exit on a target
/// zero count.
pub struct MiningEngine<S = TokioScheduler> {
    scheduler: S,
    chunk: Duration,
}

impl MiningEngine<TokioScheduler> {
    pub fn new(chunk: Duration) -> Self {
        Self::with_scheduler(TokioScheduler, chunk)
    }
}

impl Default for MiningEngine<TokioScheduler> {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK)
    }
}

impl<S: Scheduler> MiningEngine<S> {
    pub fn with_scheduler(scheduler: S, chunk: Duration) -> Self {
        Self { scheduler, chunk }
    }

    /// Search nonces from 0 upward until `job.duration` has elapsed.
    ///
    /// `on_progress` runs after every chunk, right before the yield.
    pub async fn mine<F>(&self, job: &MiningJob, mut on_progress: F) -> Result<MiningResult, MiningError>
    where
        F: FnMut(MiningProgress) + Send,
    {
        let start_time = Instant::now();
        let deadline = start_time + job.duration;
        let mut nonce = 0u64;
        let mut hash_attempts = 0u64;
        let mut best: Option<(u64, [u8; 32], u32)> = None;

        info!(
            "Mining epoch {} for {:?} (chunk {:?})",
            job.epoch_index, job.duration, self.chunk
        );

        loop {
            let chunk_end = (Instant::now() + self.chunk).min(deadline);
            let mut now = Instant::now();

            while now < chunk_end {
                for _ in 0..CLOCK_CHECK_INTERVAL {
                    let digest = compute_hash(job.epoch_index, nonce, &job.seed, &job.identity);
                    let zeros = count_leading_zero_nibbles(&digest);
                    hash_attempts += 1;

                    if best.map_or(true, |(_, _, best_zeros)| zeros > best_zeros) {
                        debug!("New best: nonce {} with {} leading zeros", nonce, zeros);
                        best = Some((nonce, digest, zeros));
                    }
                    nonce = nonce.wrapping_add(1);
                }
                now = Instant::now();
            }
            let finished = now >= deadline;

            on_progress(MiningProgress {
                percent: percent_complete(start_time.elapsed(), job.duration),
                best_zero_count: best.map_or(0, |(_, _, zeros)| zeros),
                hash_attempts,
            });

            if finished {
                break;
            }
            self.scheduler.yield_now().await;
        }

        let (best_nonce, best_hash, best_zero_count) = best.ok_or(MiningError::NoHashes)?;
        let result = MiningResult {
            best_nonce,
            best_hash,
            best_zero_count,
            hash_attempts,
            time_taken_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            "Mining done: best nonce {} with {} leading zeros after {} hashes ({:.2} H/s)",
            result.best_nonce,
            result.best_zero_count,
            result.hash_attempts,
            result.hashrate()
        );

        Ok(result)
    }
}

#[async_trait]
impl<S: Scheduler> ProofMiner for MiningEngine<S> {
    async fn mine(
        &self,
        job: &MiningJob,
        on_progress: &mut (dyn FnMut(MiningProgress) + Send),
    ) -> Result<MiningResult, MiningError> {
        MiningEngine::mine(self, job, on_progress).await
    }
}

fn percent_complete(elapsed: Duration, total: Duration) -> u8 {
    let total_ms = total.as_millis().max(1);
    (elapsed.as_millis() * 100 / total_ms).min(100) as u8
}

pub mod engine;
pub mod hash;
pub mod solution;

pub use engine::{MiningEngine, ProofMiner, Scheduler, TokioScheduler, DEFAULT_CHUNK};
pub use hash::{compute_hash, count_leading_zero_nibbles};
pub use solution::{MiningError, MiningJob, MiningProgress, MiningResult};

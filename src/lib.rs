// Library exports for kale_farmer

pub mod chain;
pub mod config;
pub mod farm;
pub mod miner;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use chain::{BridgeSigner, FarmClient, Identity, OperationKind, RemoteGateway};
pub use config::Config;
pub use farm::Farm;
pub use orchestrator::{FarmOrchestrator, OperationState, StateSynchronizer};

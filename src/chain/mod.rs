pub mod bridge_client;
pub mod client;
pub mod gateway;
pub mod signer;
pub mod types;

pub use bridge_client::BridgeSigner;
pub use client::{ClientConfig, FarmClient};
pub use gateway::{GatewayError, RemoteGateway};
pub use signer::{Signer, SignerError};
pub use types::{
    AccountStatus, EpochSnapshot, Identity, IdentityError, OperationKind, OperationParams,
    ParticipationRecord, SignedPayload, UnsignedPayload,
};

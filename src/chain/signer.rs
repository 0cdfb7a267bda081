use async_trait::async_trait;
use thiserror::Error;

use super::types::{Identity, SignedPayload, UnsignedPayload};

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("request rejected by user")]
    UserRejected,

    #[error("signer error: {0}")]
    Signer(String),

    #[error("signer unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// External signer (wallet popup). Calls may wait indefinitely on a human.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Ask the wallet to disclose its account
    async fn request_identity(&self, token: &str) -> Result<Identity, SignerError>;

    /// Ask the wallet to sign (without submitting) a prepared transaction
    async fn sign(&self, payload: &UnsignedPayload) -> Result<SignedPayload, SignerError>;
}

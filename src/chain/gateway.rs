/// Remote Gateway - typed access to the farm backend
///
/// Every call resolves or fails exactly once; retrying is the caller's decision.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{
    AccountStatus, EpochSnapshot, Identity, OperationKind, OperationParams, ParticipationRecord,
    SignedPayload, UnsignedPayload,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Backend refused to build the transaction (already entered, no balance, ...)
    #[error("{0}")]
    Validation(String),

    /// Network rejected the signed transaction
    #[error("submission rejected: {0}")]
    Submission(String),

    /// A read-only query failed on the backend side
    #[error("{endpoint} failed ({status}): {message}")]
    Query {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(String),
}

/// Backend endpoints used by the orchestrators and the synchronizer
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Build and simulate an unsigned transaction for a signed operation kind
    async fn prepare(&self, params: &OperationParams) -> Result<UnsignedPayload, GatewayError>;

    /// Broadcast a signed transaction, returning its hash
    async fn submit(&self, kind: OperationKind, signed: &SignedPayload) -> Result<String, GatewayError>;

    /// Fund an account from the faucet (no signature involved)
    async fn fund_account(&self, identity: &Identity) -> Result<(), GatewayError>;

    /// Tell the backend which identity authenticated, or why authentication failed
    async fn notify_identity(&self, outcome: Result<&Identity, &str>) -> Result<(), GatewayError>;

    /// `None` until the first entry of all time created an epoch
    async fn epoch_info(&self) -> Result<Option<EpochSnapshot>, GatewayError>;

    /// Whether the identity entered the current epoch
    async fn check_entered(&self, identity: &Identity) -> Result<bool, GatewayError>;

    async fn participation(
        &self,
        identity: &Identity,
        epoch_index: u32,
    ) -> Result<ParticipationRecord, GatewayError>;

    /// Records of the given identities that entered `epoch_index`, in backend order
    async fn participants(
        &self,
        epoch_index: u32,
        identities: &[Identity],
    ) -> Result<Vec<(Identity, ParticipationRecord)>, GatewayError>;

    async fn account_status(&self, identity: &Identity) -> Result<AccountStatus, GatewayError>;
}

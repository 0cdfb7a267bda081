/// Operation states and the transition table shared by every orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::chain::{GatewayError, OperationKind, SignerError};
use crate::miner::MiningError;

/// Lifecycle of one operation kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    Idle,
    /// Submit-proof only
    Mining { percent: u8, best_zero_count: u32 },
    Preparing,
    Signing,
    Submitting,
    Success { result_hash: Option<String> },
    Error { message: String },
    /// Submit-proof only: the new run did not beat the recorded best
    FailedToImprove { best: u32, previous: u32 },
}

impl OperationState {
    pub fn name(&self) -> &'static str {
        match self {
            OperationState::Idle => "idle",
            OperationState::Mining { .. } => "mining",
            OperationState::Preparing => "preparing",
            OperationState::Signing => "signing",
            OperationState::Submitting => "submitting",
            OperationState::Success { .. } => "success",
            OperationState::Error { .. } => "error",
            OperationState::FailedToImprove { .. } => "failed_to_improve",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, OperationState::Idle)
    }

    /// A flow is running and holds the transacting flag
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            OperationState::Mining { .. }
                | OperationState::Preparing
                | OperationState::Signing
                | OperationState::Submitting
        )
    }

    /// States a new trigger may start from
    pub fn accepts_trigger(&self) -> bool {
        matches!(
            self,
            OperationState::Idle | OperationState::Error { .. } | OperationState::FailedToImprove { .. }
        )
    }

    /// Whether `self -> next` is a legal move for an orchestrator of `kind`
    pub fn can_transition(&self, kind: OperationKind, next: &OperationState) -> bool {
        use OperationState::*;

        let proof = kind == OperationKind::SubmitProof;
        match (self, next) {
            (Idle, Mining { .. }) => proof,
            (Idle, Preparing) => !proof,
            (Mining { .. }, Mining { .. }) => true,
            (Mining { .. }, Preparing) => true,
            (Mining { .. }, FailedToImprove { .. }) => true,
            (Mining { .. }, Error { .. }) => true,
            (Preparing, Signing) => kind.requires_signature(),
            (Preparing, Success { .. }) => !kind.requires_signature(),
            (Preparing, Error { .. }) => true,
            (Signing, Submitting) => true,
            (Signing, Error { .. }) => true,
            (Submitting, Success { .. }) => true,
            (Submitting, Error { .. }) => true,
            (Success { .. }, Idle) | (Error { .. }, Idle) | (FailedToImprove { .. }, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Mining {
                percent,
                best_zero_count,
            } => write!(f, "mining {}% (best {})", percent, best_zero_count),
            OperationState::Success {
                result_hash: Some(hash),
            } => write!(f, "success ({})", hash),
            OperationState::Error { message } => write!(f, "error: {}", message),
            OperationState::FailedToImprove { best, previous } => {
                write!(f, "failed to improve ({} <= {})", best, previous)
            }
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("{kind} is busy ({state})")]
    Busy {
        kind: OperationKind,
        state: &'static str,
    },

    #[error("{kind}: invalid transition {from} -> {to}")]
    InvalidTransition {
        kind: OperationKind,
        from: &'static str,
        to: &'static str,
    },

    #[error("{expected} orchestrator cannot run {got} parameters")]
    KindMismatch {
        expected: OperationKind,
        got: OperationKind,
    },

    #[error("no active epoch")]
    NoActiveEpoch,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Mining(#[from] MiningError),
}

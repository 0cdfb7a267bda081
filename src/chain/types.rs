/// Shared ledger-facing types: identities, epoch snapshots, participation records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use stellar_strkey::ed25519::PublicKey;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid account address {address:?}: {reason}")]
pub struct IdentityError {
    pub address: String,
    pub reason: String,
}

/// A farmer account (`G...` strkey) together with its raw ed25519 key bytes
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    address: String,
    raw: [u8; 32],
}

impl Identity {
    pub fn parse(address: &str) -> Result<Self, IdentityError> {
        let key = PublicKey::from_string(address.trim()).map_err(|e| IdentityError {
            address: address.to_string(),
            reason: format!("{:?}", e),
        })?;
        Ok(Self::from_raw(key.0))
    }

    pub fn from_raw(raw: [u8; 32]) -> Self {
        Self {
            address: PublicKey(raw).to_string(),
            raw,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Key bytes fed to the work hash
    pub fn raw_bytes(&self) -> &[u8; 32] {
        &self.raw
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.address)
    }
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.address
    }
}

/// The active competition round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSnapshot {
    pub epoch_index: u32,
    pub seed: [u8; 32],
}

/// One farmer's standing in one epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationRecord {
    pub has_entered: bool,
    pub has_submitted_proof: bool,
    pub best_zero_count: u32,
}

/// Native balance and asset trust of an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub exists: bool,
    /// In stroops
    pub balance: i64,
    pub has_trust: bool,
}

/// Every operation the farm supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Enter,
    SubmitProof,
    Claim,
    Fund,
    GrantTrustline,
}

impl OperationKind {
    /// Path segment used by the backend for this operation
    pub fn route(&self) -> &'static str {
        match self {
            OperationKind::Enter => "plant",
            OperationKind::SubmitProof => "work",
            OperationKind::Claim => "harvest",
            OperationKind::Fund => "fund_account",
            OperationKind::GrantTrustline => "trustline",
        }
    }

    /// Whether the flow goes through the external signer
    pub fn requires_signature(&self) -> bool {
        !matches!(self, OperationKind::Fund)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Enter => "enter",
            OperationKind::SubmitProof => "submit-proof",
            OperationKind::Claim => "claim",
            OperationKind::Fund => "fund",
            OperationKind::GrantTrustline => "grant-trustline",
        };
        f.write_str(name)
    }
}

/// Parameters of one operation invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationParams {
    /// `epoch_index` is the epoch active when the entry was triggered
    Enter {
        identity: Identity,
        amount: i128,
        epoch_index: Option<u32>,
    },
    /// `zero_count` is the score of `nonce`; the ledger must show at least this
    SubmitProof {
        identity: Identity,
        epoch_index: u32,
        nonce: u64,
        zero_count: u32,
    },
    Claim { identity: Identity, epoch_index: u32 },
    Fund { identity: Identity },
    GrantTrustline { identity: Identity },
}

impl OperationParams {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationParams::Enter { .. } => OperationKind::Enter,
            OperationParams::SubmitProof { .. } => OperationKind::SubmitProof,
            OperationParams::Claim { .. } => OperationKind::Claim,
            OperationParams::Fund { .. } => OperationKind::Fund,
            OperationParams::GrantTrustline { .. } => OperationKind::GrantTrustline,
        }
    }

    pub fn identity(&self) -> &Identity {
        match self {
            OperationParams::Enter { identity, .. }
            | OperationParams::SubmitProof { identity, .. }
            | OperationParams::Claim { identity, .. }
            | OperationParams::Fund { identity }
            | OperationParams::GrantTrustline { identity } => identity,
        }
    }
}

/// Simulated, unsigned transaction returned by a prepare call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedPayload {
    pub xdr: String,
    /// Network passphrase the signer must sign for
    pub network: String,
}

/// Transaction envelope signed by the external signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub xdr: String,
    /// Hash reported by the signer, if any
    pub hash: Option<String>,
}

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::gateway::{GatewayError, RemoteGateway};
use super::types::{
    AccountStatus, EpochSnapshot, Identity, OperationKind, OperationParams, ParticipationRecord,
    SignedPayload, UnsignedPayload,
};

/// Configuration for the backend HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. "http://localhost:3737/api"
    pub base_url: String,
    /// Request timeout in seconds
    pub request_timeout: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3737/api".to_string(),
            request_timeout: 30,
        }
    }
}

// Wire types. Field names follow the backend, not Rust conventions.

#[derive(Debug, Serialize)]
struct PubkeyNotice<'a> {
    pubkey: Option<&'a str>,
    error: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum PrepareRequest<'a> {
    Enter {
        #[serde(rename = "publicKey")]
        public_key: &'a str,
        amount: String,
    },
    SubmitProof {
        #[serde(rename = "publicKey")]
        public_key: &'a str,
        nonce: String,
    },
    Claim {
        #[serde(rename = "publicKey")]
        public_key: &'a str,
        #[serde(rename = "blockIndex")]
        block_index: u32,
    },
    AccountOnly {
        #[serde(rename = "publicKey")]
        public_key: &'a str,
    },
}

impl<'a> PrepareRequest<'a> {
    fn from_params(params: &'a OperationParams) -> Self {
        let public_key = params.identity().address();
        match params {
            OperationParams::Enter { amount, .. } => PrepareRequest::Enter {
                public_key,
                amount: amount.to_string(),
            },
            OperationParams::SubmitProof { nonce, .. } => PrepareRequest::SubmitProof {
                public_key,
                nonce: nonce.to_string(),
            },
            OperationParams::Claim { epoch_index, .. } => PrepareRequest::Claim {
                public_key,
                block_index: *epoch_index,
            },
            OperationParams::Fund { .. } | OperationParams::GrantTrustline { .. } => {
                PrepareRequest::AccountOnly { public_key }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrepareResponse {
    xdr: String,
    network: String,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    #[serde(rename = "signedXdr")]
    signed_xdr: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    hash: String,
}

#[derive(Debug, Serialize)]
struct AccountRequest<'a> {
    #[serde(rename = "publicKey")]
    public_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct FundResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct CheckPlantedResponse {
    has_planted: bool,
}

#[derive(Debug, Deserialize)]
struct BlockInfoResponse {
    #[serde(rename = "blockIndex")]
    block_index: u32,
    #[serde(default)]
    entropy: Option<String>,
}

#[derive(Debug, Serialize)]
struct PailDataRequest<'a> {
    #[serde(rename = "publicKey")]
    public_key: &'a str,
    #[serde(rename = "blockIndex")]
    block_index: u32,
}

#[derive(Debug, Deserialize)]
struct PailDataResponse {
    #[serde(rename = "hasPail")]
    has_pail: bool,
    #[serde(rename = "hasWorked")]
    has_worked: bool,
    #[serde(rename = "leadingZeros")]
    leading_zeros: u32,
}

impl From<PailDataResponse> for ParticipationRecord {
    fn from(pail: PailDataResponse) -> Self {
        Self {
            has_entered: pail.has_pail,
            has_submitted_proof: pail.has_worked,
            best_zero_count: pail.leading_zeros,
        }
    }
}

#[derive(Debug, Serialize)]
struct AllFarmersRequest<'a> {
    #[serde(rename = "blockIndex")]
    block_index: u32,
    #[serde(rename = "farmerAddresses")]
    farmer_addresses: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct FarmerPailInfo {
    #[serde(rename = "farmerAddress")]
    farmer_address: String,
    #[serde(rename = "hasPail")]
    has_pail: bool,
    #[serde(rename = "hasWorked")]
    has_worked: bool,
    #[serde(rename = "leadingZeros")]
    leading_zeros: u32,
}

#[derive(Debug, Deserialize)]
struct AllFarmersResponse {
    farmers: Vec<FarmerPailInfo>,
}

#[derive(Debug, Deserialize)]
struct AccountStatusResponse {
    exists: bool,
    #[serde(rename = "xlmBalance")]
    xlm_balance: i64,
    #[serde(rename = "hasTrustline")]
    has_trustline: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// How a non-2xx response is classified
#[derive(Debug, Clone, Copy)]
enum Failure {
    Validation,
    Submission,
    Query,
}

/// HTTP client for the farm backend
pub struct FarmClient {
    config: ClientConfig,
    http: Client,
}

impl FarmClient {
    pub fn new(config: ClientConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B, T>(&self, path: &str, body: &B, failure: Failure) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        log::debug!("POST {}", path);
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(path, response, failure).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        log::debug!("GET {}", path);
        let response = self.http.get(self.url(path)).send().await?;
        Self::decode(path, response, Failure::Query).await
    }

    async fn decode<T: DeserializeOwned>(
        path: &str,
        response: Response,
        failure: Failure,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify(path, status, body, failure));
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(format!("{}: {}", path, e)))
    }
}

/// Map a non-2xx response to the error of the call site. A body that is not
/// `{error}` JSON becomes the message as is.
fn classify(path: &str, status: StatusCode, body: String, failure: Failure) -> GatewayError {
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    match failure {
        Failure::Validation => GatewayError::Validation(message),
        Failure::Submission => GatewayError::Submission(message),
        Failure::Query => GatewayError::Query {
            endpoint: path.to_string(),
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl RemoteGateway for FarmClient {
    async fn prepare(&self, params: &OperationParams) -> Result<UnsignedPayload, GatewayError> {
        let kind = params.kind();
        if !kind.requires_signature() {
            return Err(GatewayError::Validation(format!("{} has no transaction to prepare", kind)));
        }

        let path = format!("{}/prepare", kind.route());
        let response: PrepareResponse = self
            .post(&path, &PrepareRequest::from_params(params), Failure::Validation)
            .await?;

        Ok(UnsignedPayload {
            xdr: response.xdr,
            network: response.network,
        })
    }

    async fn submit(&self, kind: OperationKind, signed: &SignedPayload) -> Result<String, GatewayError> {
        let path = format!("{}/submit", kind.route());
        let request = SubmitRequest {
            signed_xdr: &signed.xdr,
        };
        let response: SubmitResponse = self.post(&path, &request, Failure::Submission).await?;
        Ok(response.hash)
    }

    async fn fund_account(&self, identity: &Identity) -> Result<(), GatewayError> {
        let request = AccountRequest {
            public_key: identity.address(),
        };
        let response: FundResponse = self
            .post(OperationKind::Fund.route(), &request, Failure::Validation)
            .await?;

        if response.success {
            Ok(())
        } else {
            Err(GatewayError::Validation("funding request was not accepted".to_string()))
        }
    }

    async fn notify_identity(&self, outcome: Result<&Identity, &str>) -> Result<(), GatewayError> {
        let notice = match outcome {
            Ok(identity) => PubkeyNotice {
                pubkey: Some(identity.address()),
                error: None,
            },
            Err(error) => PubkeyNotice {
                pubkey: None,
                error: Some(error),
            },
        };
        let _: serde_json::Value = self.post("pubkey", &notice, Failure::Query).await?;
        Ok(())
    }

    async fn epoch_info(&self) -> Result<Option<EpochSnapshot>, GatewayError> {
        let response: BlockInfoResponse = self.get("block_info").await?;

        let Some(entropy) = response.entropy else {
            return Ok(None);
        };
        let bytes = hex::decode(&entropy)
            .map_err(|e| GatewayError::Decode(format!("block_info entropy: {}", e)))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| GatewayError::Decode(format!("block_info entropy is {} bytes", b.len())))?;

        Ok(Some(EpochSnapshot {
            epoch_index: response.block_index,
            seed,
        }))
    }

    async fn check_entered(&self, identity: &Identity) -> Result<bool, GatewayError> {
        let request = AccountRequest {
            public_key: identity.address(),
        };
        let response: CheckPlantedResponse = self.post("check_planted", &request, Failure::Query).await?;
        Ok(response.has_planted)
    }

    async fn participation(
        &self,
        identity: &Identity,
        epoch_index: u32,
    ) -> Result<ParticipationRecord, GatewayError> {
        let request = PailDataRequest {
            public_key: identity.address(),
            block_index: epoch_index,
        };
        let response: PailDataResponse = self.post("pail_data", &request, Failure::Query).await?;
        Ok(response.into())
    }

    async fn participants(
        &self,
        epoch_index: u32,
        identities: &[Identity],
    ) -> Result<Vec<(Identity, ParticipationRecord)>, GatewayError> {
        let request = AllFarmersRequest {
            block_index: epoch_index,
            farmer_addresses: identities.iter().map(|i| i.address()).collect(),
        };
        let response: AllFarmersResponse = self.post("all_farmers", &request, Failure::Query).await?;

        response
            .farmers
            .into_iter()
            .map(|farmer| {
                let identity = Identity::parse(&farmer.farmer_address)
                    .map_err(|e| GatewayError::Decode(e.to_string()))?;
                let record = ParticipationRecord {
                    has_entered: farmer.has_pail,
                    has_submitted_proof: farmer.has_worked,
                    best_zero_count: farmer.leading_zeros,
                };
                Ok((identity, record))
            })
            .collect()
    }

    async fn account_status(&self, identity: &Identity) -> Result<AccountStatus, GatewayError> {
        let request = AccountRequest {
            public_key: identity.address(),
        };
        let response: AccountStatusResponse = self.post("account_status", &request, Failure::Query).await?;

        Ok(AccountStatus {
            exists: response.exists,
            balance: response.xlm_balance,
            has_trust: response.has_trustline,
        })
    }
}

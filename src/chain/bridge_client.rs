/// Client for the wallet signing bridge
///
/// The bridge relays requests to the user's wallet and answers once the user
/// approved or declined, so requests use a long timeout.
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::signer::{Signer, SignerError};
use super::types::{Identity, SignedPayload, UnsignedPayload};

const USER_REJECTED_CODE: &str = "user_rejected";

#[derive(Debug, Serialize)]
pub struct IdentityRequest {
    pub request_id: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SignRequest {
    pub request_id: String,
    pub xdr: String,
    pub network: String,
    pub submit: bool,
}

#[derive(Debug, Deserialize)]
pub struct BridgeResponse {
    pub success: bool,
    #[serde(default)]
    pub pubkey: Option<String>,
    #[serde(default, rename = "signedXdr")]
    pub signed_xdr: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl BridgeResponse {
    fn into_result(self) -> Result<Self, SignerError> {
        if self.success {
            return Ok(self);
        }
        if self.code.as_deref() == Some(USER_REJECTED_CODE) {
            return Err(SignerError::UserRejected);
        }
        Err(SignerError::Signer(
            self.error.unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }
}

#[derive(Clone)]
pub struct BridgeSigner {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl BridgeSigner {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, SignerError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Check if the bridge service is up
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn call<T: Serialize>(&self, path: &str, body: &T) -> Result<BridgeResponse, SignerError> {
        let url = format!("{}/{}", self.base_url, path);

        let mut req = self.client.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            req = req.header("X-API-Key", api_key);
        }

        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(rejection(status, &error_text));
        }

        let bridge_response: BridgeResponse = response.json().await?;
        bridge_response.into_result()
    }
}

/// Error for a non-2xx bridge response; 403 means the user declined
fn rejection(status: StatusCode, error_text: &str) -> SignerError {
    if status == StatusCode::FORBIDDEN {
        return SignerError::UserRejected;
    }
    SignerError::Signer(format!("bridge request failed ({}): {}", status, error_text))
}

#[async_trait]
impl Signer for BridgeSigner {
    async fn request_identity(&self, token: &str) -> Result<Identity, SignerError> {
        let request = IdentityRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            token: token.to_string(),
        };

        let response = self.call("identity", &request).await?;
        let pubkey = response
            .pubkey
            .ok_or_else(|| SignerError::Signer("Success but no pubkey returned".to_string()))?;

        Identity::parse(&pubkey).map_err(|e| SignerError::Signer(e.to_string()))
    }

    async fn sign(&self, payload: &UnsignedPayload) -> Result<SignedPayload, SignerError> {
        let request = SignRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            xdr: payload.xdr.clone(),
            network: payload.network.clone(),
            submit: false,
        };

        let response = self.call("sign", &request).await?;
        let xdr = response
            .signed_xdr
            .ok_or_else(|| SignerError::Signer("Success but no signedXdr returned".to_string()))?;

        Ok(SignedPayload {
            xdr,
            hash: response.hash,
        })
    }
}

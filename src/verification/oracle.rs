//! Oracle network client

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::verification::model::{VerificationKind, VerificationResult};

/// Oracle client failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(String),

    #[error("oracle returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unknown oracle request {0}")]
    UnknownRequest(String),

    #[error("malformed oracle response: {0}")]
    Malformed(String),

    #[error("invalid oracle client configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            OracleError::Malformed(err.to_string())
        } else {
            OracleError::Transport(err.to_string())
        }
    }
}

/// Oracle-side status of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OracleStatus {
    Pending,
    Fulfilled { result: VerificationResult },
    Failed { reason: String },
}

#[derive(Debug, Serialize)]
struct SubmitVerificationRequest<'a> {
    batch_id: u64,
    kind: VerificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SubmitVerificationResponse {
    request_id: String,
}

/// Asynchronous verification network
#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Submit a request and return the oracle-issued request id
    async fn submit_verification(
        &self,
        batch_id: u64,
        kind: VerificationKind,
        recipient: Option<&str>,
    ) -> Result<String, OracleError>;

    async fn get_status(&self, request_id: &str) -> Result<OracleStatus, OracleError>;
}

/// HTTP client for the verification network
pub struct HttpOracleClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOracleClient {
    /// Create a new oracle client
    ///
    /// # Arguments
    ///
    /// * `base_url` - Oracle gateway base URL (e.g., "http://localhost:8645")
    /// * `api_key` - Optional bearer key
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self, OracleError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| OracleError::Config(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| OracleError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OracleClient for HttpOracleClient {
    async fn submit_verification(
        &self,
        batch_id: u64,
        kind: VerificationKind,
        recipient: Option<&str>,
    ) -> Result<String, OracleError> {
        let url = format!("{}/verifications", self.base_url);
        let request = SubmitVerificationRequest {
            batch_id,
            kind,
            recipient,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if status.is_success() {
            let body: SubmitVerificationResponse = response.json().await?;
            Ok(body.request_id)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(OracleError::Api {
                status: status.as_u16(),
                message: body,
            })
        }
    }

    async fn get_status(&self, request_id: &str) -> Result<OracleStatus, OracleError> {
        let url = format!("{}/verifications/{}", self.base_url, request_id);

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else if status.as_u16() == 404 {
            Err(OracleError::UnknownRequest(request_id.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(OracleError::Api {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

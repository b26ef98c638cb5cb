//! Content-addressed storage backends for batch metadata documents

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::ApiError;
use crate::metadata::canonical::sha256_hex;

/// Metadata store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("metadata store request failed: {0}")]
    Transport(String),

    #[error("metadata store rejected the document ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed metadata store response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::StorageError(err.to_string())
    }
}

/// Immutable, content-addressed document storage
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a document and return its stable reference
    async fn put(&self, content: Vec<u8>) -> Result<String, StoreError>;

    /// Fetch the raw bytes behind a reference, `None` when the store has no such reference
    async fn get(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// In-process store; references are `sha256:<hex>` of the stored bytes
#[derive(Default)]
pub struct InMemoryMetadataStore {
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Replace the bytes behind a reference. Only meant for tampering in tests.
    pub async fn overwrite(&self, reference: &str, content: Vec<u8>) {
        self.documents
            .write()
            .await
            .insert(reference.to_string(), content);
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn put(&self, content: Vec<u8>) -> Result<String, StoreError> {
        let reference = format!("sha256:{}", sha256_hex(&content));
        let mut documents = self.documents.write().await;
        // Same content, same reference: the first write wins.
        documents.entry(reference.clone()).or_insert(content);
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.documents.read().await.get(reference).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    #[serde(rename = "ref")]
    reference: String,
}

/// Pinning gateway reached over HTTP.
///
/// `POST {base}/documents` stores a document and answers `{"ref": "..."}`,
/// `GET {base}/documents/{ref}` returns the stored bytes or 404.
pub struct HttpMetadataStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetadataStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetadataStore for HttpMetadataStore {
    async fn put(&self, content: Vec<u8>) -> Result<String, StoreError> {
        let url = format!("{}/documents", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(content)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: PutResponse = response
                .json()
                .await
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            Ok(body.reference)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn get(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let url = format!("{}/documents/{}", self.base_url, reference);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Some(response.bytes().await?.to_vec()))
    }
}

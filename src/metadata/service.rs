use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::error::{ApiError, ApiResult};
use crate::metadata::canonical::{canonical_bytes, canonicalize_raw, content_hash, sha256_hex};
use crate::metadata::model::{BatchDraft, MetadataDocument, PublishedMetadata};
use crate::metadata::store::MetadataStore;

/// Publishes batch metadata documents and reads them back with integrity checks
#[derive(Clone)]
pub struct MetadataPublisher {
    store: Arc<dyn MetadataStore>,
    production_skew: Duration,
}

impl MetadataPublisher {
    pub fn new(store: Arc<dyn MetadataStore>, production_skew: Duration) -> Self {
        Self {
            store,
            production_skew,
        }
    }

    /// Validate a draft, persist its canonical document and return the reference and hash
    pub async fn publish(&self, draft: &BatchDraft) -> ApiResult<PublishedMetadata> {
        draft.check(Utc::now(), self.production_skew)?;

        let document = MetadataDocument::from(draft);
        let bytes = canonical_bytes(&document)?;
        let content_hash = sha256_hex(&bytes);
        let reference = self.store.put(bytes).await?;

        tracing::info!(
            reference = %reference,
            content_hash = %content_hash,
            name = %draft.name,
            "Published batch metadata"
        );

        Ok(PublishedMetadata {
            reference,
            content_hash,
        })
    }

    /// Fetch a document and convert it back into a draft
    pub async fn fetch(&self, reference: &str, expected_hash: Option<&str>) -> ApiResult<BatchDraft> {
        let document = self.fetch_document(reference, expected_hash).await?;
        Ok(BatchDraft::from(document))
    }

    /// Fetch the raw document behind `reference`.
    ///
    /// The hash is computed over the canonical form of the stored bytes, so a
    /// store that reorders keys or reformats whitespace still verifies.
    pub async fn fetch_document(
        &self,
        reference: &str,
        expected_hash: Option<&str>,
    ) -> ApiResult<MetadataDocument> {
        let raw = self
            .store
            .get(reference)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Metadata document {} not found", reference)))?;

        let canonical = canonicalize_raw(&raw).map_err(|e| ApiError::IntegrityError {
            reference: reference.to_string(),
            expected: expected_hash.unwrap_or("<any>").to_string(),
            actual: format!("unparsable document ({})", e),
        })?;

        if let Some(expected) = expected_hash {
            let actual = sha256_hex(&canonical);
            if !actual.eq_ignore_ascii_case(expected) {
                tracing::warn!(
                    reference = %reference,
                    expected = %expected,
                    actual = %actual,
                    "Metadata integrity check failed"
                );
                return Err(ApiError::IntegrityError {
                    reference: reference.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        serde_json::from_slice(&canonical).map_err(|e| ApiError::IntegrityError {
            reference: reference.to_string(),
            expected: expected_hash.unwrap_or("<any>").to_string(),
            actual: format!("document does not match the metadata schema ({})", e),
        })
    }

    /// Confirm a reference exists and hashes to `expected_hash`
    pub async fn verify_reference(&self, reference: &str, expected_hash: &str) -> ApiResult<MetadataDocument> {
        self.fetch_document(reference, Some(expected_hash)).await
    }

    /// Canonical content hash of a document
    pub fn content_hash(document: &MetadataDocument) -> ApiResult<String> {
        Ok(content_hash(document)?)
    }
}

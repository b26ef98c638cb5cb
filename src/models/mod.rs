//! HTTP request and response shapes shared by the handlers

use serde::{Deserialize, Serialize};

use crate::registry::DeclaredFields;
use crate::verification::VerificationKind;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Register a batch against metadata that is already published
#[derive(Debug, Deserialize)]
pub struct RegisterBatchRequest {
    pub metadata_ref: String,
    pub content_hash: String,
    pub declared: DeclaredFields,
}

/// Start a verification for a batch
#[derive(Debug, Deserialize)]
pub struct StartVerificationRequest {
    pub kind: VerificationKind,
    #[serde(default)]
    pub recipient: Option<String>,
}

/// Outcome of a cancel call
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_verification_request_defaults_recipient() {
        let request: StartVerificationRequest =
            serde_json::from_str(r#"{"kind":"inventory-only"}"#).unwrap();
        assert_eq!(request.kind, VerificationKind::InventoryOnly);
        assert!(request.recipient.is_none());
    }

    #[test]
    fn test_ok_envelope() {
        let body = serde_json::to_value(ApiResponse::ok(5)).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], 5);
        assert!(body["error"].is_null());
    }
}

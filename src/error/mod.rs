//! Centralized error handling for BeanVault
//!
//! Every failure in the batch lifecycle is scoped to one batch or one request and
//! surfaces as an [`ApiError`] carrying a stable machine-readable code, an HTTP
//! status and a human-readable reason.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// A single violated input constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error type for every lifecycle operation, with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed: {}", join_violations(.0))]
    ValidationError(Vec<Violation>),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Integrity check failed for {reference}: expected hash {expected}, found {actual}")]
    IntegrityError {
        reference: String,
        expected: String,
        actual: String,
    },

    #[error("Batch registration rejected: {0}")]
    RegistrationError(String),

    #[error("Not authorized: {0}")]
    AuthorizationError(String),

    #[error("Invalid amount: {0}")]
    AmountError(String),

    #[error("Insufficient balance: {holder} holds {available} of batch {batch_id}, {requested} requested")]
    InsufficientBalance {
        holder: String,
        batch_id: u64,
        available: u64,
        requested: u64,
    },

    #[error("Precondition failed: {0}")]
    PreconditionError(String),

    #[error("Verification request submission failed: {0}")]
    RequestSubmissionFailed(String),

    #[error("Verification timed out after {attempts} polls")]
    Timeout { attempts: u32 },

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Verification result partially applied (minted: {minted}, batch updated: {batch_updated}): {reason}")]
    PartialApplication {
        minted: bool,
        batch_updated: bool,
        reason: String,
    },

    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Metadata store error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Stable machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::IntegrityError { .. } => "INTEGRITY_ERROR",
            ApiError::RegistrationError(_) => "REGISTRATION_ERROR",
            ApiError::AuthorizationError(_) => "AUTHORIZATION_ERROR",
            ApiError::AmountError(_) => "AMOUNT_ERROR",
            ApiError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ApiError::PreconditionError(_) => "PRECONDITION_FAILED",
            ApiError::RequestSubmissionFailed(_) => "REQUEST_SUBMISSION_FAILED",
            ApiError::Timeout { .. } => "TIMEOUT",
            ApiError::VerificationFailed(_) => "VERIFICATION_FAILED",
            ApiError::InvalidTransition { .. } => "INVALID_TRANSITION",
            ApiError::PartialApplication { .. } => "PARTIAL_APPLICATION",
            ApiError::Unauthenticated(_) => "UNAUTHENTICATED",
            ApiError::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
            ApiError::StorageError(_) => "STORAGE_ERROR",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationError(_) | ApiError::AmountError(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::IntegrityError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RegistrationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::AuthorizationError(_) => StatusCode::FORBIDDEN,
            ApiError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PreconditionError(_) => StatusCode::CONFLICT,
            ApiError::InvalidTransition { .. } => StatusCode::CONFLICT,
            ApiError::RequestSubmissionFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::VerificationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PartialApplication { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::LedgerUnavailable(_) | ApiError::StorageError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Structured details for errors that carry more than a message
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::ValidationError(violations) => serde_json::to_value(violations).ok(),
            ApiError::PartialApplication {
                minted,
                batch_updated,
                ..
            } => Some(serde_json::json!({
                "minted": minted,
                "batch_updated": batch_updated,
            })),
            ApiError::InsufficientBalance {
                available,
                requested,
                ..
            } => Some(serde_json::json!({
                "available": available,
                "requested": requested,
            })),
            _ => None,
        }
    }

    fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(error = %message, code = %error_code, "Server error occurred");
        } else {
            tracing::debug!(error = %message, code = %error_code, "Client error occurred");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Flatten validator output into a sorted violation list
pub fn violations_from(errors: &validator::ValidationErrors) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (field, field_errors) in errors.field_errors() {
        for error in field_errors.iter() {
            let message = error
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| error.code.to_string());
            violations.push(Violation::new(field, message));
        }
    }
    violations.sort_by(|a, b| a.field.cmp(&b.field).then(a.message.cmp(&b.message)));
    violations
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(violations_from(&err))
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            _ => ApiError::DatabaseError(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ApiError::LedgerUnavailable(format!("Upstream unreachable: {}", err))
        } else {
            ApiError::InternalError(format!("Upstream request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InternalError(format!("Serialization failed: {}", err))
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;

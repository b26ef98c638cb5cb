//! Verification request models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metadata::PackagingClass;

const PROGRESS_FLOOR: f64 = 10.0;
const PROGRESS_CEILING: f64 = 95.0;
const PROGRESS_DECAY: f64 = 0.85;

/// What a verification request asks the oracle to confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationKind {
    InventoryOnly,
    InventoryAndMint,
}

impl VerificationKind {
    pub fn mints(&self) -> bool {
        matches!(self, VerificationKind::InventoryAndMint)
    }
}

/// Oracle-confirmed facts about a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified_quantity: u64,
    pub price_per_unit: u64,
    pub packaging_class: PackagingClass,
    pub metadata_hash: String,
    pub verified: bool,
}

/// Why a request ended in `failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    RequestSubmissionFailed {
        message: String,
    },
    OracleFailed {
        message: String,
    },
    NotVerified,
    QuantityExceedsDeclared {
        verified: u64,
        declared: u64,
    },
    MetadataMismatch {
        registered: String,
        reported: String,
    },
    Timeout {
        attempts: u32,
    },
    PartialApplication {
        minted: bool,
        batch_updated: bool,
        message: String,
        result: VerificationResult,
    },
    Cancelled,
}

impl FailureReason {
    pub fn to_error(&self) -> ApiError {
        match self {
            FailureReason::RequestSubmissionFailed { message } => {
                ApiError::RequestSubmissionFailed(message.clone())
            }
            FailureReason::OracleFailed { message } => {
                ApiError::VerificationFailed(format!("oracle reported failure: {}", message))
            }
            FailureReason::NotVerified => {
                ApiError::VerificationFailed("oracle did not verify the batch".to_string())
            }
            FailureReason::QuantityExceedsDeclared { verified, declared } => {
                ApiError::VerificationFailed(format!(
                    "verified quantity {} exceeds declared quantity {}",
                    verified, declared
                ))
            }
            FailureReason::MetadataMismatch {
                registered,
                reported,
            } => ApiError::VerificationFailed(format!(
                "oracle reported metadata hash {} but the batch is registered with {}",
                reported, registered
            )),
            FailureReason::Timeout { attempts } => ApiError::Timeout {
                attempts: *attempts,
            },
            FailureReason::PartialApplication {
                minted,
                batch_updated,
                message,
                ..
            } => ApiError::PartialApplication {
                minted: *minted,
                batch_updated: *batch_updated,
                reason: message.clone(),
            },
            FailureReason::Cancelled => {
                ApiError::PreconditionError("verification was cancelled".to_string())
            }
        }
    }
}

/// Request state; `completed` and `failed` are terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RequestState {
    Requesting,
    Pending { progress_pct: u8, attempts: u32 },
    Completed { result: VerificationResult },
    Failed { reason: FailureReason },
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed { .. } | RequestState::Failed { .. })
    }
}

/// One oracle round-trip for one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Local tracking id, assigned before the oracle is contacted
    pub id: Uuid,
    /// Oracle-issued id, absent until submission succeeds
    pub request_id: Option<String>,
    pub batch_id: u64,
    pub kind: VerificationKind,
    pub recipient: Option<String>,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationRequest {
    pub fn new(batch_id: u64, kind: VerificationKind, recipient: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request_id: None,
            batch_id,
            kind,
            recipient,
            state: RequestState::Requesting,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub(crate) fn transition(&mut self, state: RequestState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Display progress after `attempts` unresolved polls. Never reaches 100.
pub fn interpolate_progress(attempts: u32) -> u8 {
    let exponent = attempts.min(i32::MAX as u32) as i32;
    let pct = PROGRESS_FLOOR + (PROGRESS_CEILING - PROGRESS_FLOOR) * (1.0 - PROGRESS_DECAY.powi(exponent));
    pct.floor().clamp(PROGRESS_FLOOR, PROGRESS_CEILING) as u8
}

//! Redemption models and data structures

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};

/// Redemption lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "redemption_status", rename_all = "lowercase")]
pub enum RedemptionStatus {
    Requested,  // Tokens burned, awaiting fulfillment
    Processing, // Picked up by fulfillment
    Fulfilled,  // Delivered
    Cancelled,  // Tokens refunded
}

impl RedemptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RedemptionStatus::Fulfilled | RedemptionStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: RedemptionStatus) -> bool {
        use RedemptionStatus::*;
        matches!(
            (self, next),
            (Requested, Processing) | (Requested, Cancelled) | (Processing, Fulfilled) | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RedemptionStatus::Requested => "Requested",
            RedemptionStatus::Processing => "Processing",
            RedemptionStatus::Fulfilled => "Fulfilled",
            RedemptionStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// A holder's claim to exchange tokens for physical delivery
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RedemptionRequest {
    pub redemption_id: Uuid,
    pub consumer: String,
    pub batch_id: u64,
    pub quantity: u64,
    pub delivery_address: String,
    pub contact_info: String,
    pub request_date: DateTime<Utc>,
    pub status: RedemptionStatus,
    pub fulfillment_date: Option<DateTime<Utc>>,
    pub burn_tx_hash: String,
    pub refund_tx_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RedemptionRequest {
    /// Cancelled, but the refund mint has not been recorded yet
    pub fn refund_pending(&self) -> bool {
        self.status == RedemptionStatus::Cancelled && self.refund_tx_hash.is_none()
    }

    /// Its burned tokens may still return to the holder
    pub fn holds_escrow(&self) -> bool {
        matches!(self.status, RedemptionStatus::Requested | RedemptionStatus::Processing)
            || self.refund_pending()
    }
}

/// Row shape in Postgres (BIGINT columns)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RedemptionRow {
    pub redemption_id: Uuid,
    pub consumer: String,
    pub batch_id: i64,
    pub quantity: i64,
    pub delivery_address: String,
    pub contact_info: String,
    pub request_date: DateTime<Utc>,
    pub status: RedemptionStatus,
    pub fulfillment_date: Option<DateTime<Utc>>,
    pub burn_tx_hash: String,
    pub refund_tx_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RedemptionRow> for RedemptionRequest {
    type Error = ApiError;

    fn try_from(row: RedemptionRow) -> ApiResult<Self> {
        let batch_id = u64::try_from(row.batch_id)
            .map_err(|_| ApiError::DatabaseError(format!("negative batch id {}", row.batch_id)))?;
        let quantity = u64::try_from(row.quantity)
            .map_err(|_| ApiError::DatabaseError(format!("negative quantity {}", row.quantity)))?;

        Ok(Self {
            redemption_id: row.redemption_id,
            consumer: row.consumer,
            batch_id,
            quantity,
            delivery_address: row.delivery_address,
            contact_info: row.contact_info,
            request_date: row.request_date,
            status: row.status,
            fulfillment_date: row.fulfillment_date,
            burn_tx_hash: row.burn_tx_hash,
            refund_tx_hash: row.refund_tx_hash,
            updated_at: row.updated_at,
        })
    }
}

/// Request DTO for creating a redemption; the consumer is the authenticated caller
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRedemptionRequest {
    pub batch_id: u64,
    #[validate(range(min = 1, message = "quantity must be greater than zero"))]
    pub quantity: u64,
    #[validate(length(min = 1, message = "delivery address must not be empty"))]
    pub delivery_address: String,
    #[validate(length(min = 1, message = "contact info must not be empty"))]
    pub contact_info: String,
}

/// Request DTO for advancing a redemption
#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceRedemptionRequest {
    pub status: RedemptionStatus,
}

/// Query parameters for listing redemptions
#[derive(Debug, Deserialize)]
pub struct ListRedemptionsQuery {
    pub holder: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use RedemptionStatus::*;
        assert!(Requested.can_transition_to(Processing));
        assert!(Requested.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Fulfilled));
        assert!(Processing.can_transition_to(Cancelled));

        assert!(!Requested.can_transition_to(Fulfilled));
        assert!(!Processing.can_transition_to(Requested));
        for next in [Requested, Processing, Fulfilled, Cancelled] {
            assert!(!Fulfilled.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[test]
    fn test_create_request_collects_violations() {
        let request = CreateRedemptionRequest {
            batch_id: 1,
            quantity: 0,
            delivery_address: String::new(),
            contact_info: String::new(),
        };
        let err = ApiError::from(request.validate().unwrap_err());
        match err {
            ApiError::ValidationError(violations) => assert_eq!(violations.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_serializes_capitalized() {
        assert_eq!(
            serde_json::to_string(&RedemptionStatus::Processing).unwrap(),
            "\"Processing\""
        );
    }
}

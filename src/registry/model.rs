//! Batch registry models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Violation;
use crate::metadata::{BatchDraft, MetadataDocument, PackagingClass};

/// Verification status of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    Failed,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// On-ledger coffee batch record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoffeeBatch {
    pub batch_id: u64,
    pub metadata_ref: String,
    pub metadata_hash: String,
    /// Hash most recently reported by the oracle
    pub last_known_metadata_hash: Option<String>,
    pub quantity_declared: u64,
    pub quantity_verified: Option<u64>,
    pub price_per_unit: u64,
    pub packaging: PackagingClass,
    pub production_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub verification_status: VerificationStatus,
    pub last_verified_at: Option<DateTime<Utc>>,
    /// Circulating supply: sum of mints minus sum of burns
    pub token_supply: u64,
    pub registered_at: DateTime<Utc>,
    pub tx_hash: String,
}

impl CoffeeBatch {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date <= now
    }

    /// Units the monitor compares against the low-inventory threshold
    pub fn available_units(&self) -> u64 {
        self.quantity_verified.unwrap_or(self.quantity_declared)
    }

    pub fn has_metadata_drift(&self) -> bool {
        self.last_known_metadata_hash
            .as_deref()
            .map(|reported| !reported.eq_ignore_ascii_case(&self.metadata_hash))
            .unwrap_or(false)
    }
}

/// Declared fields supplied at registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredFields {
    pub quantity: u64,
    pub price_per_unit: u64,
    pub packaging: PackagingClass,
    pub production_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
}

impl DeclaredFields {
    /// Declared fields that disagree with the metadata document, sorted by field
    pub fn mismatches(&self, document: &MetadataDocument) -> Vec<Violation> {
        let p = &document.properties;
        let mut violations = Vec::new();
        if self.expiry_date != p.expiry_date {
            violations.push(Violation::new("expiry_date", "does not match expiryDate in the metadata document"));
        }
        if self.packaging != p.packaging_info {
            violations.push(Violation::new("packaging", "does not match packagingInfo in the metadata document"));
        }
        if self.price_per_unit != p.price_per_unit {
            violations.push(Violation::new("price_per_unit", "does not match pricePerUnit in the metadata document"));
        }
        if self.production_date != p.roast_date {
            violations.push(Violation::new("production_date", "does not match roastDate in the metadata document"));
        }
        if self.quantity != p.batch_size {
            violations.push(Violation::new("quantity", "does not match batchSize in the metadata document"));
        }
        violations
    }
}

impl From<&BatchDraft> for DeclaredFields {
    fn from(draft: &BatchDraft) -> Self {
        Self {
            quantity: draft.quantity,
            price_per_unit: draft.price_per_unit,
            packaging: draft.packaging,
            production_date: draft.production_date,
            expiry_date: draft.expiry_date,
        }
    }
}

/// Registration write as the ledger receives it; the packaging class travels as its code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBatchRecord {
    pub metadata_ref: String,
    pub metadata_hash: String,
    pub quantity_declared: u64,
    pub price_per_unit: u64,
    pub packaging_class: String,
    pub production_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
}

impl NewBatchRecord {
    pub fn new(metadata_ref: &str, metadata_hash: &str, declared: &DeclaredFields) -> Self {
        Self {
            metadata_ref: metadata_ref.to_string(),
            metadata_hash: metadata_hash.to_string(),
            quantity_declared: declared.quantity,
            price_per_unit: declared.price_per_unit,
            packaging_class: declared.packaging.code().to_string(),
            production_date: declared.production_date,
            expiry_date: declared.expiry_date,
        }
    }
}

/// Verification fields written back by the orchestrator; `None` keeps the stored value
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationUpdate {
    pub status: VerificationStatus,
    pub quantity_verified: Option<u64>,
    pub verified_at: Option<DateTime<Utc>>,
    pub reported_metadata_hash: Option<String>,
}

impl VerificationUpdate {
    pub fn status(status: VerificationStatus) -> Self {
        Self {
            status,
            quantity_verified: None,
            verified_at: None,
            reported_metadata_hash: None,
        }
    }
}

/// Ledger capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Mint,
    FulfillRedemption,
    ManageThresholds,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Mint => "mint",
            Capability::FulfillRedemption => "fulfill-redemption",
            Capability::ManageThresholds => "manage-thresholds",
        };
        f.write_str(s)
    }
}

/// Why a mint is allowed to happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MintSource {
    Verification,
    RedemptionRefund,
}

/// Proof that a mint follows a completed verification or a redemption refund.
///
/// Only this crate can build one. `reference` is the idempotency key the ledger
/// uses to ignore replays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintAuthorization {
    batch_id: u64,
    recipient: String,
    amount: u64,
    reference: String,
    source: MintSource,
}

impl MintAuthorization {
    pub(crate) fn from_verification(
        request_id: &str,
        batch_id: u64,
        recipient: &str,
        amount: u64,
    ) -> Self {
        Self {
            batch_id,
            recipient: recipient.to_string(),
            amount,
            reference: request_id.to_string(),
            source: MintSource::Verification,
        }
    }

    pub(crate) fn refund(redemption_id: uuid::Uuid, batch_id: u64, consumer: &str, amount: u64) -> Self {
        Self {
            batch_id,
            recipient: consumer.to_string(),
            amount,
            reference: format!("refund:{}", redemption_id),
            source: MintSource::RedemptionRefund,
        }
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn source(&self) -> MintSource {
        self.source
    }
}

/// Result of a ledger mint or burn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerReceipt {
    pub tx_hash: String,
    /// Holder balance after the write
    pub balance: u64,
    /// True when a mint reference was already applied and nothing changed
    pub replayed: bool,
}

/// Confirmed balance plus any locally recorded, not yet reconciled value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceView {
    pub holder: String,
    pub batch_id: u64,
    pub confirmed: u64,
    pub pending: Option<u64>,
}

//! Batch metadata models: the draft a producer submits and the document that gets pinned

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{violations_from, ApiError, ApiResult, Violation};

/// Packaging class of a batch, drawn from a fixed enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackagingClass {
    #[serde(rename = "250g")]
    Bag250g,
    #[serde(rename = "500g")]
    Bag500g,
    #[serde(rename = "1kg")]
    Bag1kg,
    #[serde(rename = "bulk-30kg")]
    Bulk30kg,
    #[serde(rename = "bulk-60kg")]
    Bulk60kg,
}

impl PackagingClass {
    pub const ALL: [PackagingClass; 5] = [
        PackagingClass::Bag250g,
        PackagingClass::Bag500g,
        PackagingClass::Bag1kg,
        PackagingClass::Bulk30kg,
        PackagingClass::Bulk60kg,
    ];

    /// Wire code used in documents and ledger records
    pub fn code(&self) -> &'static str {
        match self {
            PackagingClass::Bag250g => "250g",
            PackagingClass::Bag500g => "500g",
            PackagingClass::Bag1kg => "1kg",
            PackagingClass::Bulk30kg => "bulk-30kg",
            PackagingClass::Bulk60kg => "bulk-60kg",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.code() == code)
    }
}

impl fmt::Display for PackagingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PackagingClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| format!("unknown packaging class '{}'", s))
    }
}

/// Batch description submitted by a producer before publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BatchDraft {
    #[validate(length(min = 1, message = "name must not be empty"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    #[validate(length(min = 1, message = "origin must not be empty"))]
    pub origin: String,
    #[validate(length(min = 1, message = "farmer must not be empty"))]
    pub farmer: String,
    #[serde(default)]
    pub altitude: String,
    #[serde(default)]
    pub process: String,
    #[serde(default)]
    pub roast_profile: String,
    #[serde(default)]
    pub certifications: Vec<String>,
    #[serde(default)]
    pub cupping_notes: Vec<String>,
    #[validate(range(min = 1, message = "quantity must be greater than zero"))]
    pub quantity: u64,
    pub packaging: PackagingClass,
    #[validate(range(min = 1, message = "price per unit must be greater than zero"))]
    pub price_per_unit: u64,
    pub production_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
}

impl BatchDraft {
    /// Check every constraint and report all violations at once.
    ///
    /// `skew` is the clock allowance applied to "production date is not in the future".
    pub fn check(&self, now: DateTime<Utc>, skew: Duration) -> ApiResult<()> {
        let mut violations = match self.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => violations_from(&errors),
        };

        if self.production_date > now + skew {
            violations.push(Violation::new(
                "production_date",
                "production date must not be in the future",
            ));
        }
        if self.expiry_date <= self.production_date {
            violations.push(Violation::new(
                "expiry_date",
                "expiry date must be after the production date",
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            violations.sort_by(|a, b| a.field.cmp(&b.field));
            Err(ApiError::ValidationError(violations))
        }
    }
}

/// Metadata document persisted verbatim to the content-addressed store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub properties: BatchProperties,
}

/// `properties` block of the metadata document.
///
/// `roastDate` carries the production date; `expiryDate` extends the exchanged
/// schema so a fetched document converts back into a full draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProperties {
    pub origin: String,
    pub farmer: String,
    pub altitude: String,
    pub process: String,
    pub roast_profile: String,
    pub roast_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub certifications: Vec<String>,
    #[serde(rename = "cupping_notes")]
    pub cupping_notes: Vec<String>,
    pub batch_size: u64,
    pub packaging_info: PackagingClass,
    pub price_per_unit: u64,
}

impl From<&BatchDraft> for MetadataDocument {
    fn from(draft: &BatchDraft) -> Self {
        Self {
            name: draft.name.clone(),
            description: draft.description.clone(),
            image: draft.image.clone(),
            properties: BatchProperties {
                origin: draft.origin.clone(),
                farmer: draft.farmer.clone(),
                altitude: draft.altitude.clone(),
                process: draft.process.clone(),
                roast_profile: draft.roast_profile.clone(),
                roast_date: draft.production_date,
                expiry_date: draft.expiry_date,
                certifications: draft.certifications.clone(),
                cupping_notes: draft.cupping_notes.clone(),
                batch_size: draft.quantity,
                packaging_info: draft.packaging,
                price_per_unit: draft.price_per_unit,
            },
        }
    }
}

impl From<MetadataDocument> for BatchDraft {
    fn from(document: MetadataDocument) -> Self {
        let p = document.properties;
        Self {
            name: document.name,
            description: document.description,
            image: document.image,
            origin: p.origin,
            farmer: p.farmer,
            altitude: p.altitude,
            process: p.process,
            roast_profile: p.roast_profile,
            certifications: p.certifications,
            cupping_notes: p.cupping_notes,
            quantity: p.batch_size,
            packaging: p.packaging_info,
            price_per_unit: p.price_per_unit,
            production_date: p.roast_date,
            expiry_date: p.expiry_date,
        }
    }
}

/// Reference and content hash returned by a publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedMetadata {
    pub reference: String,
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft() -> BatchDraft {
        BatchDraft {
            name: "Huila Washed Lot 7".to_string(),
            description: "Washed caturra from Huila".to_string(),
            image: None,
            origin: "Huila, Colombia".to_string(),
            farmer: "Finca La Esperanza".to_string(),
            altitude: "1750 masl".to_string(),
            process: "washed".to_string(),
            roast_profile: "medium".to_string(),
            certifications: vec!["organic".to_string()],
            cupping_notes: vec!["panela".to_string(), "red apple".to_string()],
            quantity: 100,
            packaging: PackagingClass::Bag250g,
            price_per_unit: 5,
            production_date: Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
            expiry_date: Utc.with_ymd_and_hms(2027, 9, 1, 0, 0, 0).unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_packaging_codes_round_trip() {
        for class in PackagingClass::ALL {
            assert_eq!(PackagingClass::from_code(class.code()), Some(class));
            let json = serde_json::to_string(&class).unwrap();
            assert_eq!(json, format!("\"{}\"", class.code()));
        }
        assert!("2kg".parse::<PackagingClass>().is_err());
    }

    #[test]
    fn test_valid_draft_passes() {
        assert!(draft().check(now(), Duration::minutes(5)).is_ok());
    }

    #[test]
    fn test_check_reports_every_violation() {
        let mut bad = draft();
        bad.name = String::new();
        bad.farmer = String::new();
        bad.quantity = 0;
        bad.price_per_unit = 0;
        bad.expiry_date = bad.production_date;

        match bad.check(now(), Duration::minutes(5)) {
            Err(ApiError::ValidationError(violations)) => {
                let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
                assert_eq!(
                    fields,
                    vec!["expiry_date", "farmer", "name", "price_per_unit", "quantity"]
                );
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_future_production_date_rejected_beyond_skew() {
        let mut future = draft();
        future.production_date = now() + Duration::minutes(2);
        future.expiry_date = now() + Duration::days(365);
        assert!(future.check(now(), Duration::minutes(5)).is_ok());

        future.production_date = now() + Duration::hours(1);
        let err = future.check(now(), Duration::minutes(5)).unwrap_err();
        assert!(err.to_string().contains("production_date"));
    }

    #[test]
    fn test_document_schema_field_names() {
        let document = MetadataDocument::from(&draft());
        let value = serde_json::to_value(&document).unwrap();
        let properties = &value["properties"];
        for key in [
            "origin",
            "farmer",
            "altitude",
            "process",
            "roastProfile",
            "roastDate",
            "certifications",
            "cupping_notes",
            "batchSize",
            "packagingInfo",
            "pricePerUnit",
        ] {
            assert!(properties.get(key).is_some(), "missing {}", key);
        }
        assert!(value.get("image").is_none());
    }

    #[test]
    fn test_document_converts_back_to_draft() {
        let original = draft();
        let restored = BatchDraft::from(MetadataDocument::from(&original));
        assert_eq!(restored, original);
    }
}

//! Inventory threshold models

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Process-wide thresholds read by every sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct InventoryThresholds {
    pub low_inventory_threshold: u64,
    #[validate(range(min = 1, message = "verification interval must be positive"))]
    pub verification_interval_secs: u64,
    #[validate(range(min = 1, message = "expiry warning window must be positive"))]
    pub expiry_warning_window_secs: u64,
    #[validate(range(min = 1, message = "max batches per sweep must be positive"))]
    pub max_batches_per_sweep: usize,
}

impl InventoryThresholds {
    pub fn verification_interval(&self) -> Duration {
        Duration::from_secs(self.verification_interval_secs)
    }

    pub fn expiry_warning_window(&self) -> Duration {
        Duration::from_secs(self.expiry_warning_window_secs)
    }
}

impl Default for InventoryThresholds {
    fn default() -> Self {
        Self {
            low_inventory_threshold: 10,
            verification_interval_secs: 720 * 3600,
            expiry_warning_window_secs: 30 * 86_400,
            max_batches_per_sweep: 50,
        }
    }
}

/// Reason a batch was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryFlag {
    LowInventory,
    Expired,
    ExpiringSoon,
    NeedsVerification,
    MetadataDrift,
}

/// Batches flagged by one sweep, each list ascending by id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub evaluated_at: Option<DateTime<Utc>>,
    pub scanned: usize,
    pub low_inventory: Vec<u64>,
    pub expired: Vec<u64>,
    pub expiring_soon: Vec<u64>,
    pub needs_verification: Vec<u64>,
    pub metadata_drift: Vec<u64>,
    /// Requested ids the registry does not know
    pub missing: Vec<u64>,
    /// Id to resume a paged sweep from; `None` once the listing is exhausted
    pub next_cursor: Option<u64>,
}

impl SweepReport {
    /// Flags raised for one batch
    pub fn flags_for(&self, batch_id: u64) -> Vec<InventoryFlag> {
        let mut flags = Vec::new();
        let lists = [
            (&self.low_inventory, InventoryFlag::LowInventory),
            (&self.expired, InventoryFlag::Expired),
            (&self.expiring_soon, InventoryFlag::ExpiringSoon),
            (&self.needs_verification, InventoryFlag::NeedsVerification),
            (&self.metadata_drift, InventoryFlag::MetadataDrift),
        ];
        for (ids, flag) in lists {
            if ids.contains(&batch_id) {
                flags.push(flag);
            }
        }
        flags
    }

    /// Every flagged batch id, ascending, without duplicates
    pub fn flagged_batches(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .low_inventory
            .iter()
            .chain(&self.expired)
            .chain(&self.expiring_soon)
            .chain(&self.needs_verification)
            .chain(&self.metadata_drift)
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Optional paging cursor for a sweep
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepQuery {
    pub cursor: Option<u64>,
    pub batch_ids: Option<Vec<u64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_are_valid() {
        let thresholds = InventoryThresholds::default();
        assert!(thresholds.validate().is_ok());
        assert_eq!(thresholds.verification_interval(), Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let thresholds = InventoryThresholds {
            verification_interval_secs: 0,
            max_batches_per_sweep: 0,
            ..Default::default()
        };
        let errors = thresholds.validate().unwrap_err();
        assert_eq!(errors.field_errors().len(), 2);
    }

    #[test]
    fn test_flags_for_batch() {
        let report = SweepReport {
            low_inventory: vec![1, 3],
            needs_verification: vec![3],
            ..Default::default()
        };
        assert_eq!(
            report.flags_for(3),
            vec![InventoryFlag::LowInventory, InventoryFlag::NeedsVerification]
        );
        assert!(report.flags_for(2).is_empty());
        assert_eq!(report.flagged_batches(), vec![1, 3]);
    }
}

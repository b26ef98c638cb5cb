use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::events::{EventBus, LifecycleEvent};
use crate::monitor::model::{InventoryThresholds, SweepReport};
use crate::registry::{BatchRegistry, Capability, CoffeeBatch};
use crate::verification::{VerificationKind, VerificationOrchestrator};

/// Flag batches against the thresholds at `now`. No I/O.
pub fn evaluate(batches: &[CoffeeBatch], thresholds: &InventoryThresholds, now: DateTime<Utc>) -> SweepReport {
    // Windows too large for chrono cover every representable date.
    let warning_limit = chrono::Duration::from_std(thresholds.expiry_warning_window())
        .ok()
        .and_then(|window| now.checked_add_signed(window));
    let interval = chrono::Duration::from_std(thresholds.verification_interval()).ok();

    let mut report = SweepReport {
        evaluated_at: Some(now),
        scanned: batches.len(),
        ..Default::default()
    };

    for batch in batches {
        let id = batch.batch_id;

        if batch.available_units() <= thresholds.low_inventory_threshold {
            report.low_inventory.push(id);
        }

        if batch.expiry_date <= now {
            report.expired.push(id);
        } else if warning_limit.map_or(true, |limit| batch.expiry_date <= limit) {
            report.expiring_soon.push(id);
        }

        let stale = match batch.last_verified_at {
            None => true,
            Some(verified_at) => interval.map_or(false, |interval| now - verified_at > interval),
        };
        if stale {
            report.needs_verification.push(id);
        }

        if batch.has_metadata_drift() {
            report.metadata_drift.push(id);
        }
    }

    for list in [
        &mut report.low_inventory,
        &mut report.expired,
        &mut report.expiring_soon,
        &mut report.needs_verification,
        &mut report.metadata_drift,
    ] {
        list.sort_unstable();
    }

    report
}

/// Evaluates registered batches against the inventory thresholds
#[derive(Clone)]
pub struct InventoryMonitor {
    registry: BatchRegistry,
    orchestrator: VerificationOrchestrator,
    events: EventBus,
    thresholds: Arc<RwLock<InventoryThresholds>>,
    cursor: Arc<Mutex<Option<u64>>>,
    auto_reverify: bool,
}

impl InventoryMonitor {
    pub fn new(
        registry: BatchRegistry,
        orchestrator: VerificationOrchestrator,
        events: EventBus,
        thresholds: InventoryThresholds,
        auto_reverify: bool,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            events,
            thresholds: Arc::new(RwLock::new(thresholds)),
            cursor: Arc::new(Mutex::new(None)),
            auto_reverify,
        }
    }

    pub async fn thresholds(&self) -> InventoryThresholds {
        self.thresholds.read().await.clone()
    }

    /// Replace the thresholds; the actor needs `manage-thresholds`
    pub async fn update_thresholds(
        &self,
        actor: &str,
        thresholds: InventoryThresholds,
    ) -> ApiResult<InventoryThresholds> {
        self.registry
            .require_capability(actor, Capability::ManageThresholds)
            .await?;
        thresholds.validate()?;

        *self.thresholds.write().await = thresholds.clone();
        tracing::info!(actor = %actor, thresholds = ?thresholds, "Inventory thresholds updated");
        Ok(thresholds)
    }

    /// Evaluate at most `max_batches_per_sweep` of the given ids
    pub async fn sweep(&self, batch_ids: &[u64]) -> ApiResult<SweepReport> {
        let thresholds = self.thresholds().await;
        let limit = thresholds.max_batches_per_sweep;
        let selected = &batch_ids[..batch_ids.len().min(limit)];

        let mut batches = Vec::with_capacity(selected.len());
        let mut missing = Vec::new();
        for &batch_id in selected {
            match self.registry.find_batch(batch_id).await? {
                Some(batch) => batches.push(batch),
                None => missing.push(batch_id),
            }
        }

        let mut report = evaluate(&batches, &thresholds, Utc::now());
        report.missing = missing;
        if batch_ids.len() > selected.len() {
            report.next_cursor = selected.last().copied();
        }

        tracing::debug!(
            scanned = report.scanned,
            flagged = report.flagged_batches().len(),
            "Inventory sweep finished"
        );
        Ok(report)
    }

    /// Sweep the active batches with ids above `cursor`
    pub async fn sweep_page(&self, cursor: Option<u64>) -> ApiResult<SweepReport> {
        let ids: Vec<u64> = self
            .registry
            .list_active_batch_ids()
            .await?
            .into_iter()
            .filter(|id| cursor.map_or(true, |after| *id > after))
            .collect();
        self.sweep(&ids).await
    }

    /// One scheduled tick: sweep the next page, announce flags and optionally re-verify
    pub async fn run_scheduled_tick(&self) -> ApiResult<SweepReport> {
        let mut cursor = self.cursor.lock().await;
        let report = self.sweep_page(*cursor).await?;
        *cursor = report.next_cursor;

        for batch_id in report.flagged_batches() {
            self.events.publish(LifecycleEvent::InventoryFlagged {
                batch_id,
                flags: report.flags_for(batch_id),
            });
        }

        if self.auto_reverify {
            let started = self.reverify(&report).await;
            if !started.is_empty() {
                tracing::info!(count = started.len(), "Started re-verifications for stale batches");
            }
        }

        tracing::info!(
            scanned = report.scanned,
            low_inventory = report.low_inventory.len(),
            expired = report.expired.len(),
            expiring_soon = report.expiring_soon.len(),
            needs_verification = report.needs_verification.len(),
            metadata_drift = report.metadata_drift.len(),
            "Scheduled inventory sweep"
        );
        Ok(report)
    }

    /// Start inventory-only verifications for stale, unexpired batches without an active request
    async fn reverify(&self, report: &SweepReport) -> Vec<Uuid> {
        let mut started = Vec::new();
        for &batch_id in &report.needs_verification {
            if report.expired.contains(&batch_id) {
                continue;
            }
            match self
                .orchestrator
                .start_verification(batch_id, VerificationKind::InventoryOnly, None)
                .await
            {
                Ok(handle) => started.push(handle.id),
                Err(ApiError::PreconditionError(_)) => {}
                Err(err) => {
                    tracing::warn!(batch_id, error = %err, "Automatic re-verification failed to start");
                }
            }
        }
        started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PackagingClass;
    use crate::registry::VerificationStatus;
    use chrono::Duration;

    fn batch(id: u64, now: DateTime<Utc>) -> CoffeeBatch {
        CoffeeBatch {
            batch_id: id,
            metadata_ref: format!("sha256:{}", id),
            metadata_hash: "aa".to_string(),
            last_known_metadata_hash: None,
            quantity_declared: 100,
            quantity_verified: Some(100),
            price_per_unit: 5,
            packaging: PackagingClass::Bag250g,
            production_date: now - Duration::days(10),
            expiry_date: now + Duration::days(365),
            verification_status: VerificationStatus::Verified,
            last_verified_at: Some(now - Duration::hours(1)),
            token_supply: 100,
            registered_at: now - Duration::days(10),
            tx_hash: "sim".to_string(),
        }
    }

    fn thresholds() -> InventoryThresholds {
        InventoryThresholds {
            low_inventory_threshold: 10,
            verification_interval_secs: 24 * 3600,
            expiry_warning_window_secs: 30 * 86_400,
            max_batches_per_sweep: 50,
        }
    }

    #[test]
    fn test_healthy_batch_is_not_flagged() {
        let now = Utc::now();
        let report = evaluate(&[batch(1, now)], &thresholds(), now);
        assert_eq!(report.scanned, 1);
        assert!(report.flagged_batches().is_empty());
    }

    #[test]
    fn test_each_threshold_flags_its_batch() {
        let now = Utc::now();

        let mut low = batch(1, now);
        low.quantity_verified = Some(10);

        let mut expired = batch(2, now);
        expired.expiry_date = now;

        let mut expiring = batch(3, now);
        expiring.expiry_date = now + Duration::days(30);

        let mut stale = batch(4, now);
        stale.last_verified_at = Some(now - Duration::hours(25));

        let mut never = batch(5, now);
        never.last_verified_at = None;
        never.quantity_verified = None;
        never.quantity_declared = 8;

        let mut drifted = batch(6, now);
        drifted.last_known_metadata_hash = Some("bb".to_string());

        let report = evaluate(
            &[low, expired, expiring, stale, never, drifted],
            &thresholds(),
            now,
        );

        assert_eq!(report.low_inventory, vec![1, 5]);
        assert_eq!(report.expired, vec![2]);
        assert_eq!(report.expiring_soon, vec![3]);
        assert_eq!(report.needs_verification, vec![4, 5]);
        assert_eq!(report.metadata_drift, vec![6]);
    }

    #[test]
    fn test_interval_boundary_is_not_stale() {
        let now = Utc::now();
        let mut exact = batch(1, now);
        exact.last_verified_at = Some(now - Duration::hours(24));
        let report = evaluate(&[exact], &thresholds(), now);
        assert!(report.needs_verification.is_empty());
    }
}

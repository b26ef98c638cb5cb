//! Redemption service layer - burn-backed redemption lifecycle

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult, Violation};
use crate::events::{EventBus, LifecycleEvent};
use crate::redemption::model::{CreateRedemptionRequest, RedemptionRequest, RedemptionStatus};
use crate::redemption::repository::RedemptionRepository;
use crate::registry::{BatchRegistry, Capability, MintAuthorization};

/// Service for managing the redemption lifecycle
#[derive(Clone)]
pub struct RedemptionService {
    registry: BatchRegistry,
    repository: Arc<dyn RedemptionRepository>,
    events: EventBus,
    transitions: Arc<Mutex<()>>,
}

impl RedemptionService {
    pub fn new(registry: BatchRegistry, repository: Arc<dyn RedemptionRepository>, events: EventBus) -> Self {
        Self {
            registry,
            repository,
            events,
            transitions: Arc::new(Mutex::new(())),
        }
    }

    /// Burn `quantity` of the holder's tokens and record the redemption.
    ///
    /// If the record cannot be stored after the burn, the burn is refunded and
    /// the storage error is returned.
    pub async fn request_redemption(
        &self,
        holder: &str,
        request: CreateRedemptionRequest,
    ) -> ApiResult<RedemptionRequest> {
        let mut violations = match request.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => crate::error::violations_from(&errors),
        };
        if request.delivery_address.trim().is_empty() && !request.delivery_address.is_empty() {
            violations.push(Violation::new("delivery_address", "delivery address must not be empty"));
        }
        if request.contact_info.trim().is_empty() && !request.contact_info.is_empty() {
            violations.push(Violation::new("contact_info", "contact info must not be empty"));
        }
        if !violations.is_empty() {
            violations.sort_by(|a, b| a.field.cmp(&b.field));
            return Err(ApiError::ValidationError(violations));
        }

        self.registry.get_batch(request.batch_id).await?;

        // Burn and record land together for outstanding-claim reads
        let _guard = self.transitions.lock().await;

        let available = self.registry.balance_of(holder, request.batch_id).await?;
        if request.quantity > available {
            return Err(ApiError::InsufficientBalance {
                holder: holder.to_string(),
                batch_id: request.batch_id,
                available,
                requested: request.quantity,
            });
        }

        let receipt = self
            .registry
            .burn(holder, request.batch_id, request.quantity)
            .await?;

        let now = Utc::now();
        let redemption = RedemptionRequest {
            redemption_id: Uuid::new_v4(),
            consumer: holder.to_string(),
            batch_id: request.batch_id,
            quantity: request.quantity,
            delivery_address: request.delivery_address.trim().to_string(),
            contact_info: request.contact_info.trim().to_string(),
            request_date: now,
            status: RedemptionStatus::Requested,
            fulfillment_date: None,
            burn_tx_hash: receipt.tx_hash,
            refund_tx_hash: None,
            updated_at: now,
        };

        if let Err(err) = self.repository.insert(&redemption).await {
            tracing::error!(
                redemption_id = %redemption.redemption_id,
                batch_id = redemption.batch_id,
                error = %err,
                "Failed to store redemption after burn, refunding"
            );
            let refund = MintAuthorization::refund(
                redemption.redemption_id,
                redemption.batch_id,
                holder,
                redemption.quantity,
            );
            if let Err(refund_err) = self.registry.mint(&refund).await {
                tracing::error!(
                    redemption_id = %redemption.redemption_id,
                    error = %refund_err,
                    "Compensating refund failed"
                );
                return Err(ApiError::InternalError(format!(
                    "redemption could not be stored ({}) and the burn could not be refunded ({})",
                    err, refund_err
                )));
            }
            return Err(err);
        }

        tracing::info!(
            redemption_id = %redemption.redemption_id,
            consumer = %holder,
            batch_id = redemption.batch_id,
            quantity = redemption.quantity,
            "Redemption requested"
        );
        self.publish(&redemption);

        Ok(redemption)
    }

    /// Move a redemption forward; only fulfillment identities may do this
    pub async fn advance(
        &self,
        actor: &str,
        redemption_id: Uuid,
        next: RedemptionStatus,
    ) -> ApiResult<RedemptionRequest> {
        self.registry
            .require_capability(actor, Capability::FulfillRedemption)
            .await?;
        self.transition(redemption_id, next).await
    }

    /// The consumer withdraws a request that fulfillment has not picked up yet
    pub async fn cancel_by_holder(&self, holder: &str, redemption_id: Uuid) -> ApiResult<RedemptionRequest> {
        let redemption = self.get_redemption(redemption_id).await?;
        if redemption.consumer != holder {
            return Err(ApiError::AuthorizationError(format!(
                "{} does not own redemption {}",
                holder, redemption_id
            )));
        }
        if redemption.status != RedemptionStatus::Requested && !redemption.refund_pending() {
            return Err(ApiError::PreconditionError(format!(
                "redemption {} is {} and can no longer be cancelled by its holder",
                redemption_id, redemption.status
            )));
        }
        self.transition(redemption_id, RedemptionStatus::Cancelled).await
    }

    /// Persist the next status, then settle its side effects.
    ///
    /// `Cancelled` is stored before the refund is minted. A failed refund leaves
    /// the redemption cancelled with `refund_tx_hash` unset; cancelling it again
    /// retries the refund under the same mint reference.
    async fn transition(&self, redemption_id: Uuid, next: RedemptionStatus) -> ApiResult<RedemptionRequest> {
        let _guard = self.transitions.lock().await;

        let current = self.get_redemption(redemption_id).await?;
        if next == RedemptionStatus::Cancelled && current.refund_pending() {
            return self.settle_refund(current).await;
        }
        if !current.status.can_transition_to(next) {
            return Err(ApiError::InvalidTransition {
                from: current.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        let mut updated = current.clone();
        updated.status = next;
        updated.updated_at = now;
        if next == RedemptionStatus::Fulfilled {
            updated.fulfillment_date = Some(now);
        }

        if !self.repository.update(&updated, current.status).await? {
            return Err(ApiError::InvalidTransition {
                from: current.status.to_string(),
                to: next.to_string(),
            });
        }

        tracing::info!(
            redemption_id = %redemption_id,
            from = %current.status,
            to = %next,
            "Redemption status updated"
        );
        self.publish(&updated);

        if next == RedemptionStatus::Cancelled {
            return self.settle_refund(updated).await;
        }
        Ok(updated)
    }

    /// Mint the refund of a cancelled redemption and record its transaction
    async fn settle_refund(&self, mut cancelled: RedemptionRequest) -> ApiResult<RedemptionRequest> {
        let refund = MintAuthorization::refund(
            cancelled.redemption_id,
            cancelled.batch_id,
            &cancelled.consumer,
            cancelled.quantity,
        );
        let receipt = match self.registry.mint(&refund).await {
            Ok(receipt) => receipt,
            Err(err) => {
                tracing::error!(
                    redemption_id = %cancelled.redemption_id,
                    batch_id = cancelled.batch_id,
                    error = %err,
                    "Refund mint failed; redemption stays cancelled with the refund pending"
                );
                return Err(err);
            }
        };

        cancelled.refund_tx_hash = Some(receipt.tx_hash);
        cancelled.updated_at = Utc::now();
        if !self
            .repository
            .update(&cancelled, RedemptionStatus::Cancelled)
            .await?
        {
            return Err(ApiError::InternalError(format!(
                "redemption {} changed status while its refund was recorded",
                cancelled.redemption_id
            )));
        }

        tracing::info!(
            redemption_id = %cancelled.redemption_id,
            quantity = cancelled.quantity,
            "Redemption refunded"
        );
        Ok(cancelled)
    }

    /// Tokens of a batch that holders own or may still get back: the live
    /// supply plus everything burned into unrefunded redemptions
    pub async fn outstanding_claims(&self, batch_id: u64) -> ApiResult<u64> {
        let _guard = self.transitions.lock().await;
        let batch = self.registry.get_batch(batch_id).await?;
        let escrowed = self.repository.escrowed_quantity(batch_id).await?;
        Ok(batch.token_supply.saturating_add(escrowed))
    }

    pub async fn get_redemption(&self, redemption_id: Uuid) -> ApiResult<RedemptionRequest> {
        self.repository
            .get(redemption_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Redemption {} not found", redemption_id)))
    }

    /// A holder's redemptions, newest first
    pub async fn list_redemptions(&self, holder: &str) -> ApiResult<Vec<RedemptionRequest>> {
        self.repository.list_by_consumer(holder).await
    }

    fn publish(&self, redemption: &RedemptionRequest) {
        self.events.publish(LifecycleEvent::RedemptionUpdated {
            batch_id: redemption.batch_id,
            redemption_id: redemption.redemption_id,
            status: redemption.status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{BatchDraft, InMemoryMetadataStore, MetadataPublisher, PackagingClass};
    use crate::redemption::repository::InMemoryRedemptionRepository;
    use crate::registry::SimulatedLedger;
    use async_trait::async_trait;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn draft() -> BatchDraft {
        let produced = Utc::now() - Duration::days(2);
        BatchDraft {
            name: "Kiambu AA".to_string(),
            description: String::new(),
            image: None,
            origin: "Kiambu, Kenya".to_string(),
            farmer: "Gatomboya Society".to_string(),
            altitude: "1800 masl".to_string(),
            process: "washed".to_string(),
            roast_profile: "light".to_string(),
            certifications: vec![],
            cupping_notes: vec![],
            quantity: 100,
            packaging: PackagingClass::Bag500g,
            price_per_unit: 9,
            production_date: produced,
            expiry_date: produced + Duration::days(200),
        }
    }

    struct Fixture {
        service: RedemptionService,
        registry: BatchRegistry,
        ledger: Arc<SimulatedLedger>,
        batch_id: u64,
    }

    async fn fixture_with(repository: Arc<dyn RedemptionRepository>, balance: u64) -> Fixture {
        let ledger = Arc::new(SimulatedLedger::new());
        ledger.grant("operator", Capability::Mint).await;
        ledger.grant("fulfillment", Capability::FulfillRedemption).await;
        let publisher = MetadataPublisher::new(Arc::new(InMemoryMetadataStore::new()), Duration::minutes(5));
        let events = EventBus::default();
        let registry = BatchRegistry::new(ledger.clone(), publisher, "operator", events.clone());

        let batch = registry.publish_and_register(&draft()).await.unwrap();
        if balance > 0 {
            let auth = MintAuthorization::from_verification("seed", batch.batch_id, "alice", balance);
            registry.mint(&auth).await.unwrap();
        }

        Fixture {
            service: RedemptionService::new(registry.clone(), repository, events),
            registry,
            ledger,
            batch_id: batch.batch_id,
        }
    }

    async fn fixture(balance: u64) -> Fixture {
        fixture_with(Arc::new(InMemoryRedemptionRepository::new()), balance).await
    }

    fn create(batch_id: u64, quantity: u64) -> CreateRedemptionRequest {
        CreateRedemptionRequest {
            batch_id,
            quantity,
            delivery_address: "12 Harbour Road, Mombasa".to_string(),
            contact_info: "+254 700 000000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_redemption_lifecycle() {
        let f = fixture(10).await;
        let r = f
            .service
            .request_redemption("alice", create(f.batch_id, 4))
            .await
            .unwrap();
        assert_eq!(r.status, RedemptionStatus::Requested);
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 6);

        let r = f
            .service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Processing)
            .await
            .unwrap();
        assert_eq!(r.status, RedemptionStatus::Processing);

        let r = f
            .service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Fulfilled)
            .await
            .unwrap();
        assert!(r.fulfillment_date.is_some());

        let err = f
            .service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_cancel_from_processing_refunds() {
        let f = fixture(10).await;
        let r = f
            .service
            .request_redemption("alice", create(f.batch_id, 3))
            .await
            .unwrap();
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 7);

        f.service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Processing)
            .await
            .unwrap();
        let cancelled = f
            .service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Cancelled)
            .await
            .unwrap();

        assert_eq!(cancelled.status, RedemptionStatus::Cancelled);
        assert!(cancelled.refund_tx_hash.is_some());
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_advance_requires_fulfillment_capability() {
        let f = fixture(10).await;
        let r = f
            .service
            .request_redemption("alice", create(f.batch_id, 1))
            .await
            .unwrap();

        let err = f
            .service
            .advance("alice", r.redemption_id, RedemptionStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AuthorizationError(_)));
    }

    #[tokio::test]
    async fn test_holder_cancel_only_while_requested() {
        let f = fixture(10).await;
        let r = f
            .service
            .request_redemption("alice", create(f.batch_id, 2))
            .await
            .unwrap();

        let err = f.service.cancel_by_holder("mallory", r.redemption_id).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthorizationError(_)));

        let cancelled = f.service.cancel_by_holder("alice", r.redemption_id).await.unwrap();
        assert_eq!(cancelled.status, RedemptionStatus::Cancelled);
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 10);

        let r = f
            .service
            .request_redemption("alice", create(f.batch_id, 2))
            .await
            .unwrap();
        f.service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Processing)
            .await
            .unwrap();
        let err = f.service.cancel_by_holder("alice", r.redemption_id).await.unwrap_err();
        assert!(matches!(err, ApiError::PreconditionError(_)));
    }

    #[tokio::test]
    async fn test_invalid_request_lists_every_violation() {
        let f = fixture(10).await;
        let mut request = create(f.batch_id, 0);
        request.delivery_address = "   ".to_string();
        request.contact_info = String::new();

        match f.service.request_redemption("alice", request).await {
            Err(ApiError::ValidationError(violations)) => {
                let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
                assert_eq!(fields, vec!["contact_info", "delivery_address", "quantity"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_overdraw_creates_nothing() {
        let f = fixture(5).await;
        let err = f
            .service
            .request_redemption("alice", create(f.batch_id, 6))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InsufficientBalance { available: 5, .. }));
        assert!(f.service.list_redemptions("alice").await.unwrap().is_empty());
    }

    struct RejectingRepository;

    #[async_trait]
    impl RedemptionRepository for RejectingRepository {
        async fn insert(&self, _redemption: &RedemptionRequest) -> ApiResult<()> {
            Err(ApiError::DatabaseError("connection reset".to_string()))
        }

        async fn get(&self, _redemption_id: Uuid) -> ApiResult<Option<RedemptionRequest>> {
            Ok(None)
        }

        async fn update(&self, _redemption: &RedemptionRequest, _expected: RedemptionStatus) -> ApiResult<bool> {
            Ok(false)
        }

        async fn list_by_consumer(&self, _consumer: &str) -> ApiResult<Vec<RedemptionRequest>> {
            Ok(vec![])
        }

        async fn escrowed_quantity(&self, _batch_id: u64) -> ApiResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_failed_insert_refunds_burn() {
        let f = fixture_with(Arc::new(RejectingRepository), 10).await;
        let err = f
            .service
            .request_redemption("alice", create(f.batch_id, 4))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::DatabaseError(_)));
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 10);
    }

    /// In-memory repository whose next `n` updates fail
    struct FailingUpdates {
        inner: InMemoryRedemptionRepository,
        failures: AtomicUsize,
    }

    impl FailingUpdates {
        fn new() -> Self {
            Self {
                inner: InMemoryRedemptionRepository::new(),
                failures: AtomicUsize::new(0),
            }
        }

        fn fail_next(&self, n: usize) {
            self.failures.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RedemptionRepository for FailingUpdates {
        async fn insert(&self, redemption: &RedemptionRequest) -> ApiResult<()> {
            self.inner.insert(redemption).await
        }

        async fn get(&self, redemption_id: Uuid) -> ApiResult<Option<RedemptionRequest>> {
            self.inner.get(redemption_id).await
        }

        async fn update(&self, redemption: &RedemptionRequest, expected: RedemptionStatus) -> ApiResult<bool> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ApiError::DatabaseError("connection reset".to_string()));
            }
            self.inner.update(redemption, expected).await
        }

        async fn list_by_consumer(&self, consumer: &str) -> ApiResult<Vec<RedemptionRequest>> {
            self.inner.list_by_consumer(consumer).await
        }

        async fn escrowed_quantity(&self, batch_id: u64) -> ApiResult<u64> {
            self.inner.escrowed_quantity(batch_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_cancel_write_refunds_nothing() {
        let repository = Arc::new(FailingUpdates::new());
        let f = fixture_with(repository.clone(), 10).await;
        let r = f
            .service
            .request_redemption("alice", create(f.batch_id, 3))
            .await
            .unwrap();
        f.service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Processing)
            .await
            .unwrap();

        repository.fail_next(1);
        let err = f
            .service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DatabaseError(_)));
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 7);

        let fulfilled = f
            .service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Fulfilled)
            .await
            .unwrap();
        assert_eq!(fulfilled.status, RedemptionStatus::Fulfilled);
        assert!(fulfilled.refund_tx_hash.is_none());
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_failed_refund_stays_cancelled_and_retries_once() {
        let f = fixture(10).await;
        let r = f
            .service
            .request_redemption("alice", create(f.batch_id, 3))
            .await
            .unwrap();
        f.service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Processing)
            .await
            .unwrap();

        f.ledger.revoke("operator", Capability::Mint).await;
        let err = f
            .service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AuthorizationError(_)));

        let stored = f.service.get_redemption(r.redemption_id).await.unwrap();
        assert_eq!(stored.status, RedemptionStatus::Cancelled);
        assert!(stored.refund_pending());
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 7);
        assert_eq!(f.service.outstanding_claims(f.batch_id).await.unwrap(), 10);

        let err = f
            .service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Fulfilled)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));

        f.ledger.grant("operator", Capability::Mint).await;
        let refunded = f.service.cancel_by_holder("alice", r.redemption_id).await.unwrap();
        assert!(refunded.refund_tx_hash.is_some());
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 10);

        let err = f
            .service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidTransition { .. }));
        assert_eq!(f.registry.balance_of("alice", f.batch_id).await.unwrap(), 10);
        assert_eq!(f.service.outstanding_claims(f.batch_id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_outstanding_claims_include_open_redemptions() {
        let f = fixture(10).await;
        let r = f
            .service
            .request_redemption("alice", create(f.batch_id, 4))
            .await
            .unwrap();
        assert_eq!(f.service.outstanding_claims(f.batch_id).await.unwrap(), 10);

        f.service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Processing)
            .await
            .unwrap();
        f.service
            .advance("fulfillment", r.redemption_id, RedemptionStatus::Fulfilled)
            .await
            .unwrap();
        assert_eq!(f.service.outstanding_claims(f.batch_id).await.unwrap(), 6);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_redemptions_never_overdraw(
            balance in 0u64..40,
            quantities in prop::collection::vec(1u64..15, 1..12),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let f = fixture(balance).await;
                let mut remaining = balance;

                for quantity in quantities {
                    let result = f.service.request_redemption("alice", create(f.batch_id, quantity)).await;
                    if quantity <= remaining {
                        prop_assert!(result.is_ok());
                        remaining -= quantity;
                    } else {
                        let is_insufficient = matches!(result, Err(ApiError::InsufficientBalance { .. }));
                        prop_assert!(is_insufficient);
                    }
                    let observed = f.registry.balance_of("alice", f.batch_id).await.unwrap();
                    prop_assert_eq!(observed, remaining);
                }
                Ok(())
            })?;
        }
    }
}

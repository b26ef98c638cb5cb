//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use beanvault_server::auth::AuthConfig;
use beanvault_server::events::EventBus;
use beanvault_server::metadata::{BatchDraft, InMemoryMetadataStore, MetadataPublisher, PackagingClass};
use beanvault_server::monitor::{InventoryMonitor, InventoryThresholds};
use beanvault_server::redemption::{InMemoryRedemptionRepository, RedemptionService};
use beanvault_server::registry::{
    BatchRegistry, Capability, CoffeeBatch, Ledger, LedgerError, LedgerReceipt, NewBatchRecord,
    SimulatedLedger, VerificationStatus, VerificationUpdate,
};
use beanvault_server::state::AppState;
use beanvault_server::verification::{
    OracleClient, OracleError, OracleStatus, PollPolicy, VerificationKind, VerificationOrchestrator,
    VerificationResult,
};
use beanvault_server::websocket::WsState;

pub const OPERATOR: &str = "operator";
pub const ADMIN: &str = "admin";
pub const FULFILLMENT: &str = "fulfillment";
pub const JWT_SECRET: &str = "integration-test-secret";

/// Oracle that answers polls from a script, then repeats a fallback status
pub struct ScriptedOracle {
    fail_submissions: AtomicBool,
    submit_delay: Mutex<Duration>,
    script: Mutex<VecDeque<Result<OracleStatus, OracleError>>>,
    fallback: Mutex<OracleStatus>,
    submissions: AtomicUsize,
    polls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            fail_submissions: AtomicBool::new(false),
            submit_delay: Mutex::new(Duration::ZERO),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(OracleStatus::Pending),
            submissions: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, status: OracleStatus) {
        self.script.lock().unwrap().push_back(Ok(status));
    }

    pub fn push_error(&self, error: OracleError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn set_fallback(&self, status: OracleStatus) {
        *self.fallback.lock().unwrap() = status;
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Hold every submission for `delay` before answering
    pub fn delay_submissions(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OracleClient for ScriptedOracle {
    async fn submit_verification(
        &self,
        _batch_id: u64,
        _kind: VerificationKind,
        _recipient: Option<&str>,
    ) -> Result<String, OracleError> {
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(OracleError::Transport("connection refused".to_string()));
        }
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("req-{}", n))
    }

    async fn get_status(&self, _request_id: &str) -> Result<OracleStatus, OracleError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        Ok(self.fallback.lock().unwrap().clone())
    }
}

/// Simulated ledger with injectable write failures
pub struct FlakyLedger {
    pub inner: SimulatedLedger,
    failing_mints: AtomicUsize,
    failing_verified_updates: AtomicUsize,
    applied_mints: AtomicUsize,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self {
            inner: SimulatedLedger::new(),
            failing_mints: AtomicUsize::new(0),
            failing_verified_updates: AtomicUsize::new(0),
            applied_mints: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` mint calls
    pub fn fail_mints(&self, n: usize) {
        self.failing_mints.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` updates that mark a batch verified
    pub fn fail_verified_updates(&self, n: usize) {
        self.failing_verified_updates.store(n, Ordering::SeqCst);
    }

    /// Mints that changed a balance, replays excluded
    pub fn applied_mints(&self) -> usize {
        self.applied_mints.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn register_batch(&self, record: NewBatchRecord) -> Result<CoffeeBatch, LedgerError> {
        self.inner.register_batch(record).await
    }

    async fn get_batch(&self, batch_id: u64) -> Result<Option<CoffeeBatch>, LedgerError> {
        self.inner.get_batch(batch_id).await
    }

    async fn list_active_batch_ids(&self, now: DateTime<Utc>) -> Result<Vec<u64>, LedgerError> {
        self.inner.list_active_batch_ids(now).await
    }

    async fn update_verification(
        &self,
        batch_id: u64,
        update: VerificationUpdate,
    ) -> Result<CoffeeBatch, LedgerError> {
        if update.status == VerificationStatus::Verified
            && update.quantity_verified.is_some()
            && Self::take(&self.failing_verified_updates)
        {
            return Err(LedgerError::Unavailable("injected update failure".to_string()));
        }
        self.inner.update_verification(batch_id, update).await
    }

    async fn mint(
        &self,
        batch_id: u64,
        recipient: &str,
        amount: u64,
        reference: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        if Self::take(&self.failing_mints) {
            return Err(LedgerError::Unavailable("injected mint failure".to_string()));
        }
        let receipt = self.inner.mint(batch_id, recipient, amount, reference).await?;
        if !receipt.replayed {
            self.applied_mints.fetch_add(1, Ordering::SeqCst);
        }
        Ok(receipt)
    }

    async fn burn(&self, holder: &str, batch_id: u64, amount: u64) -> Result<LedgerReceipt, LedgerError> {
        self.inner.burn(holder, batch_id, amount).await
    }

    async fn balance_of(&self, holder: &str, batch_id: u64) -> Result<u64, LedgerError> {
        self.inner.balance_of(holder, batch_id).await
    }

    async fn has_capability(&self, identity: &str, capability: Capability) -> Result<bool, LedgerError> {
        self.inner.has_capability(identity, capability).await
    }
}

/// Every service wired together over in-memory stores
pub struct Harness {
    pub ledger: Arc<FlakyLedger>,
    pub oracle: Arc<ScriptedOracle>,
    pub store: Arc<InMemoryMetadataStore>,
    pub events: EventBus,
    pub registry: BatchRegistry,
    pub orchestrator: VerificationOrchestrator,
    pub redemptions: RedemptionService,
    pub monitor: InventoryMonitor,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_policy(PollPolicy::new(Duration::from_millis(10), 20)).await
    }

    pub async fn with_policy(policy: PollPolicy) -> Self {
        let ledger = Arc::new(FlakyLedger::new());
        ledger.inner.grant(OPERATOR, Capability::Mint).await;
        ledger.inner.grant(ADMIN, Capability::ManageThresholds).await;
        ledger
            .inner
            .grant(FULFILLMENT, Capability::FulfillRedemption)
            .await;

        let oracle = Arc::new(ScriptedOracle::new());
        let store = Arc::new(InMemoryMetadataStore::new());
        let events = EventBus::default();

        let publisher = MetadataPublisher::new(store.clone(), chrono::Duration::minutes(5));
        let registry = BatchRegistry::new(ledger.clone(), publisher, OPERATOR, events.clone());
        let redemptions = RedemptionService::new(
            registry.clone(),
            Arc::new(InMemoryRedemptionRepository::new()),
            events.clone(),
        );
        let orchestrator = VerificationOrchestrator::new(
            registry.clone(),
            oracle.clone(),
            redemptions.clone(),
            policy,
            events.clone(),
        );
        let monitor = InventoryMonitor::new(
            registry.clone(),
            orchestrator.clone(),
            events.clone(),
            InventoryThresholds::default(),
            false,
        );

        Self {
            ledger,
            oracle,
            store,
            events,
            registry,
            orchestrator,
            redemptions,
            monitor,
        }
    }

    pub async fn register(&self, draft: &BatchDraft) -> CoffeeBatch {
        self.registry.publish_and_register(draft).await.unwrap()
    }

    /// Register a batch and verify it, minting `quantity` to `recipient`
    pub async fn verified_batch(&self, recipient: &str, quantity: u64) -> CoffeeBatch {
        let batch = self.register(&draft(quantity)).await;
        self.oracle.push(fulfilled(quantity, &batch.metadata_hash));
        self.orchestrator
            .start_verification(
                batch.batch_id,
                VerificationKind::InventoryAndMint,
                Some(recipient.to_string()),
            )
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        self.registry.get_batch(batch.batch_id).await.unwrap()
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.registry.clone(),
            self.orchestrator.clone(),
            self.redemptions.clone(),
            self.monitor.clone(),
            WsState::new(self.events.clone()),
            AuthConfig::new(JWT_SECRET),
            None,
        )
    }
}

pub fn draft(quantity: u64) -> BatchDraft {
    let produced = Utc::now() - chrono::Duration::days(10);
    BatchDraft {
        name: "Huila Washed".to_string(),
        description: "Washed caturra from Huila".to_string(),
        image: None,
        origin: "Huila, Colombia".to_string(),
        farmer: "Finca El Mirador".to_string(),
        altitude: "1750 masl".to_string(),
        process: "washed".to_string(),
        roast_profile: "medium".to_string(),
        certifications: vec!["organic".to_string()],
        cupping_notes: vec!["panela".to_string(), "red apple".to_string()],
        quantity,
        packaging: PackagingClass::Bag250g,
        price_per_unit: 5,
        production_date: produced,
        expiry_date: produced + chrono::Duration::days(365),
    }
}

pub fn fulfilled(quantity: u64, metadata_hash: &str) -> OracleStatus {
    OracleStatus::Fulfilled {
        result: VerificationResult {
            verified_quantity: quantity,
            price_per_unit: 5,
            packaging_class: PackagingClass::Bag250g,
            metadata_hash: metadata_hash.to_string(),
            verified: true,
        },
    }
}

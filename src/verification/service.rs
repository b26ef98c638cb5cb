//! Verification orchestrator: submit, poll, resolve and apply oracle results
//!
//! Each request's transitions run behind its own gate; the poll task, a cancel
//! and a retry never interleave on the same request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::events::{EventBus, LifecycleEvent};
use crate::redemption::RedemptionService;
use crate::registry::{BatchRegistry, MintAuthorization, VerificationStatus, VerificationUpdate};
use crate::verification::model::{
    interpolate_progress, FailureReason, RequestState, VerificationKind, VerificationRequest,
    VerificationResult,
};
use crate::verification::oracle::{OracleClient, OracleStatus};

/// Fixed-interval polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// How long a resolved request stays readable before it is evicted
    pub retention: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
            retention: Duration::from_secs(3600),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), 60)
    }
}

/// Progress of applying a result, kept across retries
#[derive(Debug, Default)]
struct Application {
    /// Amount fixed by the first application attempt, reused on retry
    planned_mint: Option<u64>,
}

struct Tracked {
    snapshot: watch::Sender<VerificationRequest>,
    cancel: watch::Sender<bool>,
    gate: Mutex<Application>,
    previous_status: VerificationStatus,
}

impl Tracked {
    fn current(&self) -> VerificationRequest {
        self.snapshot.borrow().clone()
    }
}

struct Inner {
    registry: BatchRegistry,
    oracle: Arc<dyn OracleClient>,
    redemptions: RedemptionService,
    policy: PollPolicy,
    events: EventBus,
    active: Mutex<HashMap<u64, Uuid>>,
    requests: RwLock<HashMap<Uuid, Arc<Tracked>>>,
}

/// Issues oracle verification requests and applies their results to the registry
#[derive(Clone)]
pub struct VerificationOrchestrator {
    inner: Arc<Inner>,
}

/// Caller's view of one started verification
pub struct VerificationHandle {
    pub id: Uuid,
    pub batch_id: u64,
    updates: watch::Receiver<VerificationRequest>,
    orchestrator: VerificationOrchestrator,
}

impl VerificationHandle {
    /// Watch channel carrying every snapshot of the request
    pub fn subscribe(&self) -> watch::Receiver<VerificationRequest> {
        self.updates.clone()
    }

    pub fn snapshot(&self) -> VerificationRequest {
        self.updates.borrow().clone()
    }

    pub async fn cancel(&self) -> ApiResult<bool> {
        self.orchestrator.cancel(self.id).await
    }

    /// Wait for a terminal state; a failed request surfaces as its error
    pub async fn wait(mut self) -> ApiResult<VerificationResult> {
        loop {
            {
                let current = self.updates.borrow_and_update();
                match &current.state {
                    RequestState::Completed { result } => return Ok(result.clone()),
                    RequestState::Failed { reason } => return Err(reason.to_error()),
                    _ => {}
                }
            }
            if self.updates.changed().await.is_err() {
                return Err(ApiError::InternalError(
                    "verification tracking stopped unexpectedly".to_string(),
                ));
            }
        }
    }
}

enum Outcome {
    Resolved,
    Continue,
}

impl VerificationOrchestrator {
    pub fn new(
        registry: BatchRegistry,
        oracle: Arc<dyn OracleClient>,
        redemptions: RedemptionService,
        policy: PollPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                oracle,
                redemptions,
                policy,
                events,
                active: Mutex::new(HashMap::new()),
                requests: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.inner.policy
    }

    /// Submit a verification request for a batch and start polling it
    pub async fn start_verification(
        &self,
        batch_id: u64,
        kind: VerificationKind,
        recipient: Option<String>,
    ) -> ApiResult<VerificationHandle> {
        let recipient = recipient.filter(|r| !r.trim().is_empty());
        match (kind.mints(), recipient.is_some()) {
            (true, false) => {
                return Err(ApiError::PreconditionError(
                    "a minting verification needs a recipient".to_string(),
                ))
            }
            (false, true) => {
                return Err(ApiError::PreconditionError(
                    "a recipient is only accepted for inventory-and-mint verifications".to_string(),
                ))
            }
            _ => {}
        }

        self.evict_resolved().await;

        let request = VerificationRequest::new(batch_id, kind, recipient);
        let id = request.id;

        {
            let mut active = self.inner.active.lock().await;
            if let Some(existing) = active.get(&batch_id) {
                return Err(ApiError::PreconditionError(format!(
                    "verification {} is already active for batch {}",
                    existing, batch_id
                )));
            }
            active.insert(batch_id, id);
        }

        // Read only once the slot is ours, so no other request can move the status
        let batch = match self.inner.registry.get_batch(batch_id).await {
            Ok(batch) => batch,
            Err(err) => {
                self.release_slot(batch_id, id).await;
                return Err(err);
            }
        };

        let (snapshot, updates) = watch::channel(request.clone());
        let (cancel, cancel_rx) = watch::channel(false);
        let tracked = Arc::new(Tracked {
            snapshot,
            cancel,
            gate: Mutex::new(Application::default()),
            previous_status: batch.verification_status,
        });

        // Held before the request becomes visible, so a cancel waits for submission
        let gate = tracked.gate.lock().await;
        self.inner.requests.write().await.insert(id, tracked.clone());

        tracing::info!(batch_id, verification_id = %id, kind = ?kind, "Starting verification");
        self.publish(&request);

        if batch.verification_status != VerificationStatus::Verified {
            if let Err(err) = self
                .inner
                .registry
                .set_verification_status(batch_id, VerificationStatus::Pending)
                .await
            {
                self.finish(
                    &tracked,
                    RequestState::Failed {
                        reason: FailureReason::RequestSubmissionFailed {
                            message: format!("could not mark batch pending: {}", err),
                        },
                    },
                )
                .await;
                return Err(err);
            }
        }

        let request_id = match self
            .inner
            .oracle
            .submit_verification(batch_id, kind, request.recipient.as_deref())
            .await
        {
            Ok(request_id) => request_id,
            Err(err) => {
                tracing::warn!(batch_id, verification_id = %id, error = %err, "Oracle submission failed");
                self.restore_status(batch_id, tracked.previous_status).await;
                let message = err.to_string();
                self.finish(
                    &tracked,
                    RequestState::Failed {
                        reason: FailureReason::RequestSubmissionFailed {
                            message: message.clone(),
                        },
                    },
                )
                .await;
                return Err(ApiError::RequestSubmissionFailed(message));
            }
        };

        tracked.snapshot.send_modify(|r| {
            r.request_id = Some(request_id.clone());
            r.transition(RequestState::Pending {
                progress_pct: interpolate_progress(0),
                attempts: 0,
            });
        });
        self.publish(&tracked.current());
        drop(gate);

        tracing::info!(batch_id, verification_id = %id, request_id = %request_id, "Verification submitted");

        let orchestrator = self.clone();
        let poll_target = tracked.clone();
        tokio::spawn(async move {
            orchestrator.poll(poll_target, cancel_rx, request_id).await;
        });

        Ok(VerificationHandle {
            id,
            batch_id,
            updates,
            orchestrator: self.clone(),
        })
    }

    async fn poll(&self, tracked: Arc<Tracked>, mut cancel_rx: watch::Receiver<bool>, request_id: String) {
        let policy = self.inner.policy;
        let mut attempts: u32 = 0;

        loop {
            if *cancel_rx.borrow() {
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(policy.interval) => {}
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let mut application = tracked.gate.lock().await;
            let request = tracked.current();
            if request.is_terminal() {
                return;
            }

            attempts += 1;
            let outcome = match self.inner.oracle.get_status(&request_id).await {
                Ok(OracleStatus::Pending) => Outcome::Continue,
                Ok(OracleStatus::Fulfilled { result }) => {
                    self.resolve(&tracked, &mut application, &request, result).await;
                    Outcome::Resolved
                }
                Ok(OracleStatus::Failed { reason }) => {
                    tracing::warn!(
                        batch_id = request.batch_id,
                        request_id = %request_id,
                        reason = %reason,
                        "Oracle reported verification failure"
                    );
                    self.reject(&tracked, FailureReason::OracleFailed { message: reason }, None)
                        .await;
                    Outcome::Resolved
                }
                Err(err) => {
                    tracing::debug!(
                        batch_id = request.batch_id,
                        request_id = %request_id,
                        attempt = attempts,
                        error = %err,
                        "Transient oracle error, retrying"
                    );
                    Outcome::Continue
                }
            };

            if let Outcome::Resolved = outcome {
                return;
            }

            if attempts >= policy.max_attempts {
                tracing::warn!(
                    batch_id = request.batch_id,
                    request_id = %request_id,
                    attempts,
                    "Verification timed out"
                );
                self.restore_status(request.batch_id, tracked.previous_status).await;
                self.finish(
                    &tracked,
                    RequestState::Failed {
                        reason: FailureReason::Timeout { attempts },
                    },
                )
                .await;
                return;
            }

            tracked.snapshot.send_modify(|r| {
                r.transition(RequestState::Pending {
                    progress_pct: interpolate_progress(attempts),
                    attempts,
                })
            });
            self.publish(&tracked.current());
        }
    }

    async fn resolve(
        &self,
        tracked: &Tracked,
        application: &mut Application,
        request: &VerificationRequest,
        result: VerificationResult,
    ) {
        let batch = match self.inner.registry.get_batch(request.batch_id).await {
            Ok(batch) => batch,
            Err(err) => {
                self.fail_application(tracked, request, result, false, false, err.to_string())
                    .await;
                return;
            }
        };

        let rejection = if !result.verified {
            Some(FailureReason::NotVerified)
        } else if result.verified_quantity > batch.quantity_declared {
            Some(FailureReason::QuantityExceedsDeclared {
                verified: result.verified_quantity,
                declared: batch.quantity_declared,
            })
        } else if !result.metadata_hash.eq_ignore_ascii_case(&batch.metadata_hash) {
            Some(FailureReason::MetadataMismatch {
                registered: batch.metadata_hash.clone(),
                reported: result.metadata_hash.clone(),
            })
        } else {
            None
        };

        if let Some(reason) = rejection {
            tracing::warn!(batch_id = request.batch_id, reason = ?reason, "Oracle result rejected");
            self.reject(tracked, reason, Some(result.metadata_hash.clone())).await;
            return;
        }

        let (minted, batch_updated, errors) = self
            .apply(application, request, &result, false, false)
            .await;

        if errors.is_empty() {
            tracing::info!(
                batch_id = request.batch_id,
                verified_quantity = result.verified_quantity,
                "Verification completed"
            );
            self.finish(tracked, RequestState::Completed { result }).await;
        } else {
            self.fail_application(tracked, request, result, minted, batch_updated, errors.join("; "))
                .await;
        }
    }

    /// Apply the halves of a result not yet applied. Returns what is now done and what failed.
    async fn apply(
        &self,
        application: &mut Application,
        request: &VerificationRequest,
        result: &VerificationResult,
        mut minted: bool,
        mut batch_updated: bool,
    ) -> (bool, bool, Vec<String>) {
        let mut errors = Vec::new();

        if request.kind.mints() && !minted {
            match self.mint_verified(application, request, result).await {
                Ok(()) => minted = true,
                Err(err) => errors.push(format!("mint failed: {}", err)),
            }
        }

        if !batch_updated {
            let update = VerificationUpdate {
                status: VerificationStatus::Verified,
                quantity_verified: Some(result.verified_quantity),
                verified_at: Some(Utc::now()),
                reported_metadata_hash: Some(result.metadata_hash.clone()),
            };
            match self
                .inner
                .registry
                .record_verification(request.batch_id, update)
                .await
            {
                Ok(_) => batch_updated = true,
                Err(err) => errors.push(format!("batch update failed: {}", err)),
            }
        }

        (minted, batch_updated, errors)
    }

    async fn mint_verified(
        &self,
        application: &mut Application,
        request: &VerificationRequest,
        result: &VerificationResult,
    ) -> ApiResult<()> {
        let (Some(request_id), Some(recipient)) = (&request.request_id, &request.recipient) else {
            return Err(ApiError::InternalError(
                "minting verification without request id or recipient".to_string(),
            ));
        };

        let amount = match application.planned_mint {
            Some(amount) => amount,
            None => {
                let claims = self
                    .inner
                    .redemptions
                    .outstanding_claims(request.batch_id)
                    .await?;
                let amount = result.verified_quantity.saturating_sub(claims);
                application.planned_mint = Some(amount);
                amount
            }
        };

        if amount == 0 {
            tracing::info!(batch_id = request.batch_id, "Outstanding claims already cover verified quantity");
            return Ok(());
        }

        let authorization =
            MintAuthorization::from_verification(request_id, request.batch_id, recipient, amount);
        self.inner.registry.mint(&authorization).await?;
        Ok(())
    }

    async fn fail_application(
        &self,
        tracked: &Tracked,
        request: &VerificationRequest,
        result: VerificationResult,
        minted: bool,
        batch_updated: bool,
        message: String,
    ) {
        tracing::error!(
            batch_id = request.batch_id,
            verification_id = %request.id,
            minted,
            batch_updated,
            error = %message,
            "Verification result only partially applied"
        );
        if !batch_updated {
            self.restore_status(request.batch_id, tracked.previous_status).await;
        }
        self.finish(
            tracked,
            RequestState::Failed {
                reason: FailureReason::PartialApplication {
                    minted,
                    batch_updated,
                    message,
                    result,
                },
            },
        )
        .await;
    }

    /// Oracle failure or rejected result: a verified batch stays verified, anything else fails
    async fn reject(&self, tracked: &Tracked, reason: FailureReason, reported_hash: Option<String>) {
        let batch_id = tracked.current().batch_id;
        let keep_verified = match self.inner.registry.find_batch(batch_id).await {
            Ok(Some(batch)) => batch.verification_status == VerificationStatus::Verified,
            _ => tracked.previous_status == VerificationStatus::Verified,
        };
        let update = VerificationUpdate {
            status: if keep_verified {
                VerificationStatus::Verified
            } else {
                VerificationStatus::Failed
            },
            quantity_verified: None,
            verified_at: None,
            reported_metadata_hash: reported_hash,
        };
        if let Err(err) = self.inner.registry.record_verification(batch_id, update).await {
            tracing::error!(batch_id, error = %err, "Failed to record verification failure on batch");
        }

        self.finish(tracked, RequestState::Failed { reason }).await;
    }

    /// Put the batch back to the status it had before the attempt, never leaving `verified`
    async fn restore_status(&self, batch_id: u64, previous: VerificationStatus) {
        let current = match self.inner.registry.find_batch(batch_id).await {
            Ok(Some(batch)) => batch.verification_status,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(batch_id, error = %err, "Could not read batch to restore its status");
                return;
            }
        };
        if current == previous || current == VerificationStatus::Verified {
            return;
        }
        if let Err(err) = self
            .inner
            .registry
            .set_verification_status(batch_id, previous)
            .await
        {
            tracing::error!(batch_id, status = %previous, error = %err, "Failed to restore batch status");
        }
    }

    async fn finish(&self, tracked: &Tracked, state: RequestState) {
        tracked.snapshot.send_modify(|r| r.transition(state));
        let request = tracked.current();
        self.release_slot(request.batch_id, request.id).await;
        self.publish(&request);
    }

    async fn release_slot(&self, batch_id: u64, id: Uuid) {
        let mut active = self.inner.active.lock().await;
        if active.get(&batch_id) == Some(&id) {
            active.remove(&batch_id);
        }
    }

    fn publish(&self, request: &VerificationRequest) {
        self.inner.events.publish(LifecycleEvent::VerificationUpdated {
            batch_id: request.batch_id,
            verification_id: request.id,
            state: request.state.clone(),
        });
    }

    /// Drop requests resolved longer than the retention window ago.
    ///
    /// A partially applied result stays until a retry completes it.
    async fn evict_resolved(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.inner.policy.retention) else {
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return;
        };

        let mut requests = self.inner.requests.write().await;
        let before = requests.len();
        requests.retain(|_, tracked| {
            let request = tracked.current();
            let retryable = matches!(
                request.state,
                RequestState::Failed {
                    reason: FailureReason::PartialApplication { .. }
                }
            );
            !request.is_terminal() || retryable || request.updated_at > cutoff
        });

        let evicted = before - requests.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted resolved verification requests");
        }
    }

    async fn tracked(&self, id: Uuid) -> ApiResult<Arc<Tracked>> {
        self.inner
            .requests
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Verification request {} not found", id)))
    }

    /// Stop tracking a request. Returns `false` when it had already resolved.
    ///
    /// The oracle request itself is not retracted.
    pub async fn cancel(&self, id: Uuid) -> ApiResult<bool> {
        let tracked = self.tracked(id).await?;
        tracked.cancel.send_replace(true);

        let _application = tracked.gate.lock().await;
        let request = tracked.current();
        if request.is_terminal() {
            return Ok(false);
        }

        tracing::info!(batch_id = request.batch_id, verification_id = %id, "Verification cancelled");
        self.restore_status(request.batch_id, tracked.previous_status).await;
        self.finish(
            &tracked,
            RequestState::Failed {
                reason: FailureReason::Cancelled,
            },
        )
        .await;
        Ok(true)
    }

    /// Re-apply the missing halves of a partially applied result.
    ///
    /// The mint reuses the original authorization reference and amount, so it
    /// can never mint twice. On success the request moves to `completed`.
    pub async fn retry_application(&self, id: Uuid) -> ApiResult<VerificationRequest> {
        let tracked = self.tracked(id).await?;
        let mut application = tracked.gate.lock().await;
        let request = tracked.current();

        let (minted, batch_updated, result) = match &request.state {
            RequestState::Failed {
                reason:
                    FailureReason::PartialApplication {
                        minted,
                        batch_updated,
                        result,
                        ..
                    },
            } => (*minted, *batch_updated, result.clone()),
            _ => {
                return Err(ApiError::PreconditionError(format!(
                    "verification {} is not partially applied",
                    id
                )))
            }
        };

        {
            let active = self.inner.active.lock().await;
            if let Some(other) = active.get(&request.batch_id) {
                return Err(ApiError::PreconditionError(format!(
                    "verification {} is active for batch {}",
                    other, request.batch_id
                )));
            }
        }

        let (minted, batch_updated, errors) = self
            .apply(&mut application, &request, &result, minted, batch_updated)
            .await;

        if errors.is_empty() {
            tracing::info!(batch_id = request.batch_id, verification_id = %id, "Verification application retried successfully");
            self.finish(&tracked, RequestState::Completed { result }).await;
            Ok(tracked.current())
        } else {
            let message = errors.join("; ");
            self.finish(
                &tracked,
                RequestState::Failed {
                    reason: FailureReason::PartialApplication {
                        minted,
                        batch_updated,
                        message: message.clone(),
                        result,
                    },
                },
            )
            .await;
            Err(ApiError::PartialApplication {
                minted,
                batch_updated,
                reason: message,
            })
        }
    }

    pub async fn get_request(&self, id: Uuid) -> ApiResult<VerificationRequest> {
        Ok(self.tracked(id).await?.current())
    }

    /// Every request tracked for a batch, oldest first
    pub async fn list_requests(&self, batch_id: u64) -> Vec<VerificationRequest> {
        let requests = self.inner.requests.read().await;
        let mut found: Vec<VerificationRequest> = requests
            .values()
            .map(|tracked| tracked.current())
            .filter(|r| r.batch_id == batch_id)
            .collect();
        found.sort_by_key(|r| r.created_at);
        found
    }

    pub async fn active_request(&self, batch_id: u64) -> Option<VerificationRequest> {
        let id = self.inner.active.lock().await.get(&batch_id).copied()?;
        self.get_request(id).await.ok()
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiResult};
use crate::events::{EventBus, LifecycleEvent};
use crate::metadata::{BatchDraft, MetadataPublisher};
use crate::registry::ledger::{Ledger, LedgerError};
use crate::registry::model::{
    BalanceView, Capability, CoffeeBatch, DeclaredFields, LedgerReceipt, MintAuthorization,
    NewBatchRecord, VerificationStatus, VerificationUpdate,
};

/// Client for the on-chain batch registry and its token
#[derive(Clone)]
pub struct BatchRegistry {
    ledger: Arc<dyn Ledger>,
    publisher: MetadataPublisher,
    operator: String,
    events: EventBus,
    /// Balances reported by our own writes, not yet confirmed by a read
    pending: Arc<RwLock<HashMap<(String, u64), u64>>>,
}

impl BatchRegistry {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        publisher: MetadataPublisher,
        operator: impl Into<String>,
        events: EventBus,
    ) -> Self {
        Self {
            ledger,
            publisher,
            operator: operator.into(),
            events,
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn publisher(&self) -> &MetadataPublisher {
        &self.publisher
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Register a batch whose metadata is already published.
    ///
    /// The document must exist, hash to `content_hash` and agree with `declared`
    /// before the ledger is touched.
    pub async fn register_batch(
        &self,
        metadata_ref: &str,
        content_hash: &str,
        declared: DeclaredFields,
    ) -> ApiResult<CoffeeBatch> {
        let document = self
            .publisher
            .verify_reference(metadata_ref, content_hash)
            .await?;
        let mismatches = declared.mismatches(&document);
        if !mismatches.is_empty() {
            return Err(ApiError::ValidationError(mismatches));
        }

        let record = NewBatchRecord::new(metadata_ref, content_hash, &declared);
        let batch = self.ledger.register_batch(record).await.map_err(|e| match e {
            LedgerError::Rejected(reason) => ApiError::RegistrationError(reason),
            other => other.into(),
        })?;

        tracing::info!(
            batch_id = batch.batch_id,
            metadata_ref = %batch.metadata_ref,
            tx_hash = %batch.tx_hash,
            "Batch registered"
        );
        self.events.publish(LifecycleEvent::BatchRegistered {
            batch_id: batch.batch_id,
            metadata_ref: batch.metadata_ref.clone(),
            tx_hash: batch.tx_hash.clone(),
        });

        Ok(batch)
    }

    /// Publish the draft's metadata, then register the batch against it
    pub async fn publish_and_register(&self, draft: &BatchDraft) -> ApiResult<CoffeeBatch> {
        let published = self.publisher.publish(draft).await?;
        self.register_batch(
            &published.reference,
            &published.content_hash,
            DeclaredFields::from(draft),
        )
        .await
    }

    pub async fn get_batch(&self, batch_id: u64) -> ApiResult<CoffeeBatch> {
        self.find_batch(batch_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Batch {} not found", batch_id)))
    }

    pub async fn find_batch(&self, batch_id: u64) -> ApiResult<Option<CoffeeBatch>> {
        Ok(self.ledger.get_batch(batch_id).await?)
    }

    /// Snapshot of unexpired batch ids, ascending
    pub async fn list_active_batch_ids(&self) -> ApiResult<Vec<u64>> {
        Ok(self.ledger.list_active_batch_ids(Utc::now()).await?)
    }

    pub async fn list_active_batches(&self) -> ApiResult<Vec<CoffeeBatch>> {
        let mut batches = Vec::new();
        for batch_id in self.list_active_batch_ids().await? {
            if let Some(batch) = self.ledger.get_batch(batch_id).await? {
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    /// Mint under an authorization; replays of the same reference mint nothing
    pub async fn mint(&self, authorization: &MintAuthorization) -> ApiResult<LedgerReceipt> {
        if authorization.amount() == 0 {
            return Err(ApiError::AmountError("mint amount must be greater than zero".to_string()));
        }
        self.require_capability(&self.operator, Capability::Mint).await?;

        let receipt = self
            .ledger
            .mint(
                authorization.batch_id(),
                authorization.recipient(),
                authorization.amount(),
                authorization.reference(),
            )
            .await?;

        if receipt.replayed {
            tracing::info!(
                batch_id = authorization.batch_id(),
                reference = %authorization.reference(),
                "Mint reference already applied, skipping"
            );
            return Ok(receipt);
        }

        self.record_pending(authorization.recipient(), authorization.batch_id(), receipt.balance)
            .await;
        tracing::info!(
            batch_id = authorization.batch_id(),
            recipient = %authorization.recipient(),
            amount = authorization.amount(),
            source = ?authorization.source(),
            tx_hash = %receipt.tx_hash,
            "Tokens minted"
        );
        self.events.publish(LifecycleEvent::TokensMinted {
            batch_id: authorization.batch_id(),
            recipient: authorization.recipient().to_string(),
            amount: authorization.amount(),
            tx_hash: receipt.tx_hash.clone(),
        });

        Ok(receipt)
    }

    pub(crate) async fn burn(&self, holder: &str, batch_id: u64, amount: u64) -> ApiResult<LedgerReceipt> {
        if amount == 0 {
            return Err(ApiError::AmountError("burn amount must be greater than zero".to_string()));
        }

        let receipt = self.ledger.burn(holder, batch_id, amount).await?;
        self.record_pending(holder, batch_id, receipt.balance).await;

        tracing::info!(batch_id, holder = %holder, amount, tx_hash = %receipt.tx_hash, "Tokens burned");
        self.events.publish(LifecycleEvent::TokensBurned {
            batch_id,
            holder: holder.to_string(),
            amount,
            tx_hash: receipt.tx_hash.clone(),
        });

        Ok(receipt)
    }

    /// Confirmed balance read from the ledger; clears any pending value
    pub async fn balance_of(&self, holder: &str, batch_id: u64) -> ApiResult<u64> {
        let confirmed = self.ledger.balance_of(holder, batch_id).await?;
        self.pending
            .write()
            .await
            .remove(&(holder.to_string(), batch_id));
        Ok(confirmed)
    }

    /// Confirmed balance plus the pending value it reconciled, when they disagreed
    pub async fn balance_view(&self, holder: &str, batch_id: u64) -> ApiResult<BalanceView> {
        let recorded = self
            .pending
            .read()
            .await
            .get(&(holder.to_string(), batch_id))
            .copied();
        let confirmed = self.balance_of(holder, batch_id).await?;

        Ok(BalanceView {
            holder: holder.to_string(),
            batch_id,
            confirmed,
            pending: recorded.filter(|value| *value != confirmed),
        })
    }

    pub async fn has_capability(&self, identity: &str, capability: Capability) -> ApiResult<bool> {
        Ok(self.ledger.has_capability(identity, capability).await?)
    }

    pub async fn require_capability(&self, identity: &str, capability: Capability) -> ApiResult<()> {
        if self.has_capability(identity, capability).await? {
            Ok(())
        } else {
            Err(ApiError::AuthorizationError(format!(
                "{} does not hold the '{}' capability",
                identity, capability
            )))
        }
    }

    pub(crate) async fn record_verification(
        &self,
        batch_id: u64,
        update: VerificationUpdate,
    ) -> ApiResult<CoffeeBatch> {
        let status = update.status;
        let batch = self.ledger.update_verification(batch_id, update).await?;
        self.events
            .publish(LifecycleEvent::BatchStatusChanged { batch_id, status });
        Ok(batch)
    }

    pub(crate) async fn set_verification_status(
        &self,
        batch_id: u64,
        status: VerificationStatus,
    ) -> ApiResult<CoffeeBatch> {
        self.record_verification(batch_id, VerificationUpdate::status(status))
            .await
    }

    async fn record_pending(&self, holder: &str, batch_id: u64, balance: u64) {
        self.pending
            .write()
            .await
            .insert((holder.to_string(), batch_id), balance);
    }

    #[cfg(test)]
    pub(crate) async fn pending_balance(&self, holder: &str, batch_id: u64) -> Option<u64> {
        self.pending
            .read()
            .await
            .get(&(holder.to_string(), batch_id))
            .copied()
    }
}

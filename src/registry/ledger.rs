//! Token ledger seam and the in-process simulated ledger

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ApiError;
use crate::metadata::PackagingClass;
use crate::registry::model::{
    Capability, CoffeeBatch, LedgerReceipt, NewBatchRecord, VerificationStatus, VerificationUpdate,
};

/// Ledger write and read failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger rejected the write: {0}")]
    Rejected(String),

    #[error("batch {0} is not registered")]
    UnknownBatch(u64),

    #[error("{holder} holds {available} of batch {batch_id}, {requested} requested")]
    InsufficientBalance {
        holder: String,
        batch_id: u64,
        available: u64,
        requested: u64,
    },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(reason) => {
                ApiError::PreconditionError(format!("ledger rejected the write: {}", reason))
            }
            LedgerError::UnknownBatch(id) => ApiError::NotFound(format!("Batch {} not found", id)),
            LedgerError::InsufficientBalance {
                holder,
                batch_id,
                available,
                requested,
            } => ApiError::InsufficientBalance {
                holder,
                batch_id,
                available,
                requested,
            },
            LedgerError::Unavailable(reason) => ApiError::LedgerUnavailable(reason),
        }
    }
}

/// On-chain batch registry and token contract, as seen by this service
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn register_batch(&self, record: NewBatchRecord) -> Result<CoffeeBatch, LedgerError>;

    async fn get_batch(&self, batch_id: u64) -> Result<Option<CoffeeBatch>, LedgerError>;

    /// Ids of batches not expired at `now`, ascending
    async fn list_active_batch_ids(&self, now: DateTime<Utc>) -> Result<Vec<u64>, LedgerError>;

    async fn update_verification(
        &self,
        batch_id: u64,
        update: VerificationUpdate,
    ) -> Result<CoffeeBatch, LedgerError>;

    /// Mint `amount` to `recipient`. A `reference` already applied is a no-op replay.
    async fn mint(
        &self,
        batch_id: u64,
        recipient: &str,
        amount: u64,
        reference: &str,
    ) -> Result<LedgerReceipt, LedgerError>;

    async fn burn(&self, holder: &str, batch_id: u64, amount: u64) -> Result<LedgerReceipt, LedgerError>;

    async fn balance_of(&self, holder: &str, batch_id: u64) -> Result<u64, LedgerError>;

    async fn has_capability(&self, identity: &str, capability: Capability) -> Result<bool, LedgerError>;
}

#[derive(Debug, Clone)]
struct AppliedMint {
    batch_id: u64,
    recipient: String,
    amount: u64,
    tx_hash: String,
}

#[derive(Default)]
struct LedgerState {
    next_batch_id: u64,
    batches: BTreeMap<u64, CoffeeBatch>,
    balances: HashMap<(String, u64), u64>,
    applied_mints: HashMap<String, AppliedMint>,
    capabilities: HashMap<String, HashSet<Capability>>,
}

/// In-process ledger standing in for the batch registry contract.
///
/// Every write goes through one mutex, so mints and burns on the same
/// balance are serialized the way the contract serializes them.
pub struct SimulatedLedger {
    state: Mutex<LedgerState>,
}

fn simulated_tx_hash() -> String {
    format!("sim_{}", Uuid::new_v4().simple())
}

impl SimulatedLedger {
    pub fn new() -> Self {
        tracing::warn!("Using simulated batch ledger; no transactions reach a real network");
        Self {
            state: Mutex::new(LedgerState {
                next_batch_id: 1,
                ..Default::default()
            }),
        }
    }

    pub async fn grant(&self, identity: &str, capability: Capability) {
        let mut state = self.state.lock().await;
        state
            .capabilities
            .entry(identity.to_string())
            .or_default()
            .insert(capability);
        tracing::info!(identity = %identity, capability = %capability, "Capability granted");
    }

    pub async fn revoke(&self, identity: &str, capability: Capability) {
        let mut state = self.state.lock().await;
        if let Some(caps) = state.capabilities.get_mut(identity) {
            caps.remove(&capability);
        }
        tracing::info!(identity = %identity, capability = %capability, "Capability revoked");
    }

    fn validate_record(record: &NewBatchRecord) -> Result<PackagingClass, LedgerError> {
        let packaging = PackagingClass::from_code(&record.packaging_class).ok_or_else(|| {
            LedgerError::Rejected(format!("unknown packaging class '{}'", record.packaging_class))
        })?;
        if record.quantity_declared == 0 {
            return Err(LedgerError::Rejected("quantity must be positive".to_string()));
        }
        if record.price_per_unit == 0 {
            return Err(LedgerError::Rejected("price per unit must be positive".to_string()));
        }
        if record.expiry_date <= record.production_date {
            return Err(LedgerError::Rejected(
                "expiry date must be after the production date".to_string(),
            ));
        }
        Ok(packaging)
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for SimulatedLedger {
    async fn register_batch(&self, record: NewBatchRecord) -> Result<CoffeeBatch, LedgerError> {
        let packaging = Self::validate_record(&record)?;

        let mut state = self.state.lock().await;
        let batch_id = state.next_batch_id;
        state.next_batch_id += 1;

        let batch = CoffeeBatch {
            batch_id,
            metadata_ref: record.metadata_ref,
            metadata_hash: record.metadata_hash,
            last_known_metadata_hash: None,
            quantity_declared: record.quantity_declared,
            quantity_verified: None,
            price_per_unit: record.price_per_unit,
            packaging,
            production_date: record.production_date,
            expiry_date: record.expiry_date,
            verification_status: VerificationStatus::Unverified,
            last_verified_at: None,
            token_supply: 0,
            registered_at: Utc::now(),
            tx_hash: simulated_tx_hash(),
        };
        state.batches.insert(batch_id, batch.clone());

        tracing::debug!(batch_id, tx_hash = %batch.tx_hash, "Simulated batch registration");
        Ok(batch)
    }

    async fn get_batch(&self, batch_id: u64) -> Result<Option<CoffeeBatch>, LedgerError> {
        Ok(self.state.lock().await.batches.get(&batch_id).cloned())
    }

    async fn list_active_batch_ids(&self, now: DateTime<Utc>) -> Result<Vec<u64>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .batches
            .values()
            .filter(|batch| !batch.is_expired(now))
            .map(|batch| batch.batch_id)
            .collect())
    }

    async fn update_verification(
        &self,
        batch_id: u64,
        update: VerificationUpdate,
    ) -> Result<CoffeeBatch, LedgerError> {
        let mut state = self.state.lock().await;
        let batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or(LedgerError::UnknownBatch(batch_id))?;

        let quantity_verified = update.quantity_verified.or(batch.quantity_verified);
        let last_verified_at = update.verified_at.or(batch.last_verified_at);

        if let Some(quantity) = quantity_verified {
            if quantity > batch.quantity_declared {
                return Err(LedgerError::Rejected(format!(
                    "verified quantity {} exceeds declared {}",
                    quantity, batch.quantity_declared
                )));
            }
        }
        if update.status == VerificationStatus::Verified
            && (quantity_verified.is_none() || last_verified_at.is_none())
        {
            return Err(LedgerError::Rejected(
                "a verified batch needs a verified quantity and timestamp".to_string(),
            ));
        }

        batch.verification_status = update.status;
        batch.quantity_verified = quantity_verified;
        batch.last_verified_at = last_verified_at;
        if let Some(hash) = update.reported_metadata_hash {
            batch.last_known_metadata_hash = Some(hash);
        }

        Ok(batch.clone())
    }

    async fn mint(
        &self,
        batch_id: u64,
        recipient: &str,
        amount: u64,
        reference: &str,
    ) -> Result<LedgerReceipt, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::Rejected("mint amount must be positive".to_string()));
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some(applied) = state.applied_mints.get(reference) {
            if applied.batch_id != batch_id || applied.recipient != recipient || applied.amount != amount {
                return Err(LedgerError::Rejected(format!(
                    "mint reference '{}' was already used for a different mint",
                    reference
                )));
            }
            let balance = state
                .balances
                .get(&(recipient.to_string(), batch_id))
                .copied()
                .unwrap_or(0);
            return Ok(LedgerReceipt {
                tx_hash: applied.tx_hash.clone(),
                balance,
                replayed: true,
            });
        }

        let batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or(LedgerError::UnknownBatch(batch_id))?;
        batch.token_supply = batch
            .token_supply
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Rejected("token supply overflow".to_string()))?;

        let balance = state
            .balances
            .entry((recipient.to_string(), batch_id))
            .or_insert(0);
        *balance += amount;
        let balance = *balance;

        let tx_hash = simulated_tx_hash();
        state.applied_mints.insert(
            reference.to_string(),
            AppliedMint {
                batch_id,
                recipient: recipient.to_string(),
                amount,
                tx_hash: tx_hash.clone(),
            },
        );

        tracing::debug!(batch_id, recipient = %recipient, amount, reference = %reference, "Simulated mint");
        Ok(LedgerReceipt {
            tx_hash,
            balance,
            replayed: false,
        })
    }

    async fn burn(&self, holder: &str, batch_id: u64, amount: u64) -> Result<LedgerReceipt, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::Rejected("burn amount must be positive".to_string()));
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if !state.batches.contains_key(&batch_id) {
            return Err(LedgerError::UnknownBatch(batch_id));
        }

        let key = (holder.to_string(), batch_id);
        let available = state.balances.get(&key).copied().unwrap_or(0);
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                holder: holder.to_string(),
                batch_id,
                available,
                requested: amount,
            });
        }

        let balance = available - amount;
        state.balances.insert(key, balance);
        if let Some(batch) = state.batches.get_mut(&batch_id) {
            batch.token_supply = batch.token_supply.saturating_sub(amount);
        }

        let tx_hash = simulated_tx_hash();
        tracing::debug!(batch_id, holder = %holder, amount, "Simulated burn");
        Ok(LedgerReceipt {
            tx_hash,
            balance,
            replayed: false,
        })
    }

    async fn balance_of(&self, holder: &str, batch_id: u64) -> Result<u64, LedgerError> {
        let state = self.state.lock().await;
        if !state.batches.contains_key(&batch_id) {
            return Err(LedgerError::UnknownBatch(batch_id));
        }
        Ok(state
            .balances
            .get(&(holder.to_string(), batch_id))
            .copied()
            .unwrap_or(0))
    }

    async fn has_capability(&self, identity: &str, capability: Capability) -> Result<bool, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .capabilities
            .get(identity)
            .map(|caps| caps.contains(&capability))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn record() -> NewBatchRecord {
        let now = Utc::now();
        NewBatchRecord {
            metadata_ref: "sha256:aa".to_string(),
            metadata_hash: "aa".to_string(),
            quantity_declared: 100,
            price_per_unit: 5,
            packaging_class: "250g".to_string(),
            production_date: now - Duration::days(1),
            expiry_date: now + Duration::days(100),
        }
    }

    #[tokio::test]
    async fn test_register_assigns_ascending_ids() {
        let ledger = SimulatedLedger::new();
        let a = ledger.register_batch(record()).await.unwrap();
        let b = ledger.register_batch(record()).await.unwrap();
        assert_eq!((a.batch_id, b.batch_id), (1, 2));
        assert_eq!(a.verification_status, VerificationStatus::Unverified);
        assert!(a.tx_hash.starts_with("sim_"));
    }

    #[tokio::test]
    async fn test_register_rejects_malformed_records() {
        let ledger = SimulatedLedger::new();

        let mut bad = record();
        bad.packaging_class = "2kg".to_string();
        assert!(matches!(
            ledger.register_batch(bad).await,
            Err(LedgerError::Rejected(_))
        ));

        let mut bad = record();
        bad.expiry_date = bad.production_date;
        assert!(matches!(
            ledger.register_batch(bad).await,
            Err(LedgerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_batches_are_not_listed() {
        let ledger = SimulatedLedger::new();
        let mut short = record();
        short.production_date = Utc::now() - Duration::days(10);
        short.expiry_date = Utc::now() - Duration::days(1);
        ledger.register_batch(short).await.unwrap();
        let live = ledger.register_batch(record()).await.unwrap();

        let ids = ledger.list_active_batch_ids(Utc::now()).await.unwrap();
        assert_eq!(ids, vec![live.batch_id]);
    }

    #[tokio::test]
    async fn test_mint_replay_is_ignored() {
        let ledger = SimulatedLedger::new();
        let batch = ledger.register_batch(record()).await.unwrap();

        let first = ledger.mint(batch.batch_id, "alice", 10, "req-1").await.unwrap();
        let again = ledger.mint(batch.batch_id, "alice", 10, "req-1").await.unwrap();

        assert!(!first.replayed);
        assert!(again.replayed);
        assert_eq!(again.tx_hash, first.tx_hash);
        assert_eq!(ledger.balance_of("alice", batch.batch_id).await.unwrap(), 10);

        let conflicting = ledger.mint(batch.batch_id, "bob", 10, "req-1").await;
        assert!(matches!(conflicting, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_burn_cannot_overdraw() {
        let ledger = SimulatedLedger::new();
        let batch = ledger.register_batch(record()).await.unwrap();
        ledger.mint(batch.batch_id, "alice", 5, "req-1").await.unwrap();

        let err = ledger.burn("alice", batch.batch_id, 6).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                holder: "alice".to_string(),
                batch_id: batch.batch_id,
                available: 5,
                requested: 6,
            }
        );
        let receipt = ledger.burn("alice", batch.batch_id, 5).await.unwrap();
        assert_eq!(receipt.balance, 0);
    }

    #[tokio::test]
    async fn test_verified_update_requires_quantity_and_timestamp() {
        let ledger = SimulatedLedger::new();
        let batch = ledger.register_batch(record()).await.unwrap();

        let err = ledger
            .update_verification(batch.batch_id, VerificationUpdate::status(VerificationStatus::Verified))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));

        let too_many = VerificationUpdate {
            status: VerificationStatus::Verified,
            quantity_verified: Some(101),
            verified_at: Some(Utc::now()),
            reported_metadata_hash: None,
        };
        assert!(ledger.update_verification(batch.batch_id, too_many).await.is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Mint(u8, u64),
        Burn(u8, u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..3, 1u64..50).prop_map(|(h, a)| Op::Mint(h, a)),
            (0u8..3, 1u64..50).prop_map(|(h, a)| Op::Burn(h, a)),
        ]
    }

    proptest! {
        #[test]
        fn prop_balances_conserve_mints_minus_burns(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let ledger = SimulatedLedger::new();
                let batch = ledger.register_batch(record()).await.unwrap();
                let mut expected = [0u64; 3];

                for (i, op) in ops.iter().enumerate() {
                    match op {
                        Op::Mint(h, amount) => {
                            let holder = format!("holder-{}", h);
                            ledger.mint(batch.batch_id, &holder, *amount, &format!("ref-{}", i)).await.unwrap();
                            expected[*h as usize] += amount;
                        }
                        Op::Burn(h, amount) => {
                            let holder = format!("holder-{}", h);
                            let result = ledger.burn(&holder, batch.batch_id, *amount).await;
                            if *amount <= expected[*h as usize] {
                                prop_assert!(result.is_ok());
                                expected[*h as usize] -= amount;
                            } else {
                                prop_assert!(result.is_err());
                            }
                        }
                    }

                    for h in 0..3u8 {
                        let balance = ledger.balance_of(&format!("holder-{}", h), batch.batch_id).await.unwrap();
                        prop_assert_eq!(balance, expected[h as usize]);
                    }
                    let supply = ledger.get_batch(batch.batch_id).await.unwrap().unwrap().token_supply;
                    prop_assert_eq!(supply, expected.iter().sum::<u64>());
                }
                Ok(())
            })?;
        }
    }
}

//! Redemption persistence

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::redemption::model::{RedemptionRequest, RedemptionRow, RedemptionStatus};

/// Storage for redemption requests
#[async_trait]
pub trait RedemptionRepository: Send + Sync {
    async fn insert(&self, redemption: &RedemptionRequest) -> ApiResult<()>;

    async fn get(&self, redemption_id: Uuid) -> ApiResult<Option<RedemptionRequest>>;

    /// Overwrite a redemption only if its stored status is still `expected`.
    /// Returns `false` when another writer moved it first.
    async fn update(&self, redemption: &RedemptionRequest, expected: RedemptionStatus) -> ApiResult<bool>;

    /// Redemptions of one consumer, newest first
    async fn list_by_consumer(&self, consumer: &str) -> ApiResult<Vec<RedemptionRequest>>;

    /// Tokens of a batch burned into redemptions that may still be refunded:
    /// open requests plus cancellations whose refund has not been minted
    async fn escrowed_quantity(&self, batch_id: u64) -> ApiResult<u64>;
}

/// Process-local repository for tests and database-less development
#[derive(Default)]
pub struct InMemoryRedemptionRepository {
    redemptions: RwLock<HashMap<Uuid, RedemptionRequest>>,
}

impl InMemoryRedemptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RedemptionRepository for InMemoryRedemptionRepository {
    async fn insert(&self, redemption: &RedemptionRequest) -> ApiResult<()> {
        let mut redemptions = self.redemptions.write().await;
        if redemptions.contains_key(&redemption.redemption_id) {
            return Err(ApiError::DatabaseError(format!(
                "redemption {} already exists",
                redemption.redemption_id
            )));
        }
        redemptions.insert(redemption.redemption_id, redemption.clone());
        Ok(())
    }

    async fn get(&self, redemption_id: Uuid) -> ApiResult<Option<RedemptionRequest>> {
        Ok(self.redemptions.read().await.get(&redemption_id).cloned())
    }

    async fn update(&self, redemption: &RedemptionRequest, expected: RedemptionStatus) -> ApiResult<bool> {
        let mut redemptions = self.redemptions.write().await;
        match redemptions.get_mut(&redemption.redemption_id) {
            Some(stored) if stored.status == expected => {
                *stored = redemption.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ApiError::NotFound(format!(
                "Redemption {} not found",
                redemption.redemption_id
            ))),
        }
    }

    async fn list_by_consumer(&self, consumer: &str) -> ApiResult<Vec<RedemptionRequest>> {
        let redemptions = self.redemptions.read().await;
        let mut found: Vec<RedemptionRequest> = redemptions
            .values()
            .filter(|r| r.consumer == consumer)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.request_date.cmp(&a.request_date));
        Ok(found)
    }

    async fn escrowed_quantity(&self, batch_id: u64) -> ApiResult<u64> {
        let redemptions = self.redemptions.read().await;
        Ok(redemptions
            .values()
            .filter(|r| r.batch_id == batch_id && r.holds_escrow())
            .map(|r| r.quantity)
            .sum())
    }
}

/// Postgres-backed repository (`redemptions` table)
#[derive(Clone)]
pub struct PgRedemptionRepository {
    db_pool: PgPool,
}

impl PgRedemptionRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

fn to_i64(value: u64, field: &str) -> ApiResult<i64> {
    i64::try_from(value).map_err(|_| ApiError::AmountError(format!("{} {} is out of range", field, value)))
}

#[async_trait]
impl RedemptionRepository for PgRedemptionRepository {
    async fn insert(&self, redemption: &RedemptionRequest) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO redemptions (
                redemption_id, consumer, batch_id, quantity, delivery_address, contact_info,
                request_date, status, fulfillment_date, burn_tx_hash, refund_tx_hash, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(redemption.redemption_id)
        .bind(&redemption.consumer)
        .bind(to_i64(redemption.batch_id, "batch id")?)
        .bind(to_i64(redemption.quantity, "quantity")?)
        .bind(&redemption.delivery_address)
        .bind(&redemption.contact_info)
        .bind(redemption.request_date)
        .bind(redemption.status)
        .bind(redemption.fulfillment_date)
        .bind(&redemption.burn_tx_hash)
        .bind(&redemption.refund_tx_hash)
        .bind(redemption.updated_at)
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    async fn get(&self, redemption_id: Uuid) -> ApiResult<Option<RedemptionRequest>> {
        let row = sqlx::query_as::<_, RedemptionRow>("SELECT * FROM redemptions WHERE redemption_id = $1")
            .bind(redemption_id)
            .fetch_optional(&self.db_pool)
            .await?;

        row.map(RedemptionRequest::try_from).transpose()
    }

    async fn update(&self, redemption: &RedemptionRequest, expected: RedemptionStatus) -> ApiResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE redemptions
            SET status = $1, fulfillment_date = $2, refund_tx_hash = $3, updated_at = $4
            WHERE redemption_id = $5 AND status = $6
            "#,
        )
        .bind(redemption.status)
        .bind(redemption.fulfillment_date)
        .bind(&redemption.refund_tx_hash)
        .bind(redemption.updated_at)
        .bind(redemption.redemption_id)
        .bind(expected)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.get(redemption.redemption_id).await?.is_none() {
                return Err(ApiError::NotFound(format!(
                    "Redemption {} not found",
                    redemption.redemption_id
                )));
            }
            return Ok(false);
        }

        Ok(true)
    }

    async fn list_by_consumer(&self, consumer: &str) -> ApiResult<Vec<RedemptionRequest>> {
        let rows = sqlx::query_as::<_, RedemptionRow>(
            "SELECT * FROM redemptions WHERE consumer = $1 ORDER BY request_date DESC",
        )
        .bind(consumer)
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(RedemptionRequest::try_from).collect()
    }

    async fn escrowed_quantity(&self, batch_id: u64) -> ApiResult<u64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM redemptions
            WHERE batch_id = $1
              AND (status IN ('requested', 'processing')
                   OR (status = 'cancelled' AND refund_tx_hash IS NULL))
            "#,
        )
        .bind(to_i64(batch_id, "batch id")?)
        .fetch_one(&self.db_pool)
        .await?;

        u64::try_from(total)
            .map_err(|_| ApiError::DatabaseError(format!("negative escrowed quantity {}", total)))
    }
}

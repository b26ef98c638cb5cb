//! Batch and metadata handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::ApiResult;
use crate::metadata::{BatchDraft, PublishedMetadata};
use crate::middleware::Caller;
use crate::models::{ApiResponse, RegisterBatchRequest};
use crate::registry::{BalanceView, CoffeeBatch};
use crate::state::AppState;
use crate::verification::VerificationRequest;

/// Publish a metadata document without registering a batch
pub async fn publish_metadata(
    State(state): State<AppState>,
    caller: Caller,
    Json(draft): Json<BatchDraft>,
) -> ApiResult<(StatusCode, Json<ApiResponse<PublishedMetadata>>)> {
    let published = state.registry.publisher().publish(&draft).await?;
    tracing::info!(caller = %caller.identity, reference = %published.reference, "Metadata published");
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(published))))
}

/// Publish the draft's metadata and register the batch in one step
pub async fn create_batch(
    State(state): State<AppState>,
    caller: Caller,
    Json(draft): Json<BatchDraft>,
) -> ApiResult<(StatusCode, Json<ApiResponse<CoffeeBatch>>)> {
    let batch = state.registry.publish_and_register(&draft).await?;
    tracing::info!(caller = %caller.identity, batch_id = batch.batch_id, "Batch created");
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(batch))))
}

/// Register a batch against already published metadata
pub async fn register_batch(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<RegisterBatchRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<CoffeeBatch>>)> {
    let batch = state
        .registry
        .register_batch(&request.metadata_ref, &request.content_hash, request.declared)
        .await?;
    tracing::info!(caller = %caller.identity, batch_id = batch.batch_id, "Batch registered");
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(batch))))
}

/// List the batches that have not expired
pub async fn list_batches(
    State(state): State<AppState>,
) -> ApiResult<Json<ApiResponse<Vec<CoffeeBatch>>>> {
    let batches = state.registry.list_active_batches().await?;
    Ok(Json(ApiResponse::ok(batches)))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
) -> ApiResult<Json<ApiResponse<CoffeeBatch>>> {
    let batch = state.registry.get_batch(batch_id).await?;
    Ok(Json(ApiResponse::ok(batch)))
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path((batch_id, holder)): Path<(u64, String)>,
) -> ApiResult<Json<ApiResponse<BalanceView>>> {
    let view = state.registry.balance_view(&holder, batch_id).await?;
    Ok(Json(ApiResponse::ok(view)))
}

/// Every verification request tracked for a batch
pub async fn list_batch_verifications(
    State(state): State<AppState>,
    Path(batch_id): Path<u64>,
) -> ApiResult<Json<ApiResponse<Vec<VerificationRequest>>>> {
    state.registry.get_batch(batch_id).await?;
    let requests = state.orchestrator.list_requests(batch_id).await;
    Ok(Json(ApiResponse::ok(requests)))
}

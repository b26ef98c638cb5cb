//! Verification handlers
//!
//! Starting, cancelling and retrying a verification are operator actions: the
//! caller must hold `mint` on the registry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::Caller;
use crate::models::{ApiResponse, CancelResponse, StartVerificationRequest};
use crate::registry::Capability;
use crate::state::AppState;
use crate::verification::VerificationRequest;

/// Submit a verification request; polling continues in the background
pub async fn start_verification(
    State(state): State<AppState>,
    caller: Caller,
    Path(batch_id): Path<u64>,
    Json(request): Json<StartVerificationRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<VerificationRequest>>)> {
    state
        .registry
        .require_capability(&caller.identity, Capability::Mint)
        .await?;

    let handle = state
        .orchestrator
        .start_verification(batch_id, request.kind, request.recipient)
        .await?;
    tracing::info!(
        caller = %caller.identity,
        batch_id,
        verification_id = %handle.id,
        "Verification requested"
    );
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ok(handle.snapshot()))))
}

pub async fn get_verification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<VerificationRequest>>> {
    let request = state.orchestrator.get_request(id).await?;
    Ok(Json(ApiResponse::ok(request)))
}

/// Stop tracking a request; `cancelled` is false when it had already resolved
pub async fn cancel_verification(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<CancelResponse>>> {
    state
        .registry
        .require_capability(&caller.identity, Capability::Mint)
        .await?;

    let cancelled = state.orchestrator.cancel(id).await?;
    tracing::info!(caller = %caller.identity, verification_id = %id, cancelled, "Verification cancel requested");
    Ok(Json(ApiResponse::ok(CancelResponse { cancelled })))
}

pub async fn retry_verification(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<VerificationRequest>>> {
    state
        .registry
        .require_capability(&caller.identity, Capability::Mint)
        .await?;

    let request = state.orchestrator.retry_application(id).await?;
    tracing::info!(caller = %caller.identity, verification_id = %id, "Verification application retried");
    Ok(Json(ApiResponse::ok(request)))
}

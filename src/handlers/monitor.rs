//! Inventory monitor handlers

use axum::{extract::State, Json};

use crate::error::ApiResult;
use crate::middleware::Caller;
use crate::models::ApiResponse;
use crate::monitor::{InventoryThresholds, SweepQuery, SweepReport};
use crate::state::AppState;

/// Run a read-only sweep over explicit ids, or one page of the active batches
pub async fn run_sweep(
    State(state): State<AppState>,
    _caller: Caller,
    query: Option<Json<SweepQuery>>,
) -> ApiResult<Json<ApiResponse<SweepReport>>> {
    let query = query.map(|Json(q)| q).unwrap_or_default();
    let report = match query.batch_ids {
        Some(ids) => state.monitor.sweep(&ids).await?,
        None => state.monitor.sweep_page(query.cursor).await?,
    };
    Ok(Json(ApiResponse::ok(report)))
}

pub async fn get_thresholds(
    State(state): State<AppState>,
) -> Json<ApiResponse<InventoryThresholds>> {
    Json(ApiResponse::ok(state.monitor.thresholds().await))
}

pub async fn update_thresholds(
    State(state): State<AppState>,
    caller: Caller,
    Json(thresholds): Json<InventoryThresholds>,
) -> ApiResult<Json<ApiResponse<InventoryThresholds>>> {
    let updated = state
        .monitor
        .update_thresholds(&caller.identity, thresholds)
        .await?;
    Ok(Json(ApiResponse::ok(updated)))
}

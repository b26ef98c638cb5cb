//! Redemption handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::Caller;
use crate::models::ApiResponse;
use crate::redemption::{
    AdvanceRedemptionRequest, CreateRedemptionRequest, ListRedemptionsQuery, RedemptionRequest,
};
use crate::registry::Capability;
use crate::state::AppState;

/// Redeem the caller's tokens for physical delivery
pub async fn create_redemption(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<CreateRedemptionRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<RedemptionRequest>>)> {
    let redemption = state
        .redemptions
        .request_redemption(&caller.identity, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(redemption))))
}

/// List redemptions for `holder`, defaulting to the caller.
///
/// Reading someone else's redemptions needs `fulfill-redemption`.
pub async fn list_redemptions(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListRedemptionsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<RedemptionRequest>>>> {
    let holder = query.holder.unwrap_or_else(|| caller.identity.clone());
    if holder != caller.identity {
        state
            .registry
            .require_capability(&caller.identity, Capability::FulfillRedemption)
            .await?;
    }

    let redemptions = state.redemptions.list_redemptions(&holder).await?;
    Ok(Json(ApiResponse::ok(redemptions)))
}

pub async fn get_redemption(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<RedemptionRequest>>> {
    let redemption = state.redemptions.get_redemption(id).await?;
    if redemption.consumer != caller.identity {
        state
            .registry
            .require_capability(&caller.identity, Capability::FulfillRedemption)
            .await?;
    }
    Ok(Json(ApiResponse::ok(redemption)))
}

/// Fulfillment moves a redemption to its next status
pub async fn advance_redemption(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(request): Json<AdvanceRedemptionRequest>,
) -> ApiResult<Json<ApiResponse<RedemptionRequest>>> {
    let redemption = state
        .redemptions
        .advance(&caller.identity, id, request.status)
        .await?;
    Ok(Json(ApiResponse::ok(redemption)))
}

/// The consumer cancels their own request
pub async fn cancel_redemption(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<RedemptionRequest>>> {
    let redemption = state
        .redemptions
        .cancel_by_holder(&caller.identity, id)
        .await?;
    Ok(Json(ApiResponse::ok(redemption)))
}

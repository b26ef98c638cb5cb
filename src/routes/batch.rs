//! Batch route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/api/metadata", post(publish_metadata))
        .route("/api/batches", post(create_batch).get(list_batches))
        .route("/api/registrations", post(register_batch))
        .route("/api/batches/:id", get(get_batch))
        .route("/api/batches/:id/balance/:holder", get(get_balance))
        .route(
            "/api/batches/:id/verifications",
            post(start_verification).get(list_batch_verifications),
        )
}

//! Verification route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn verification_routes() -> Router<AppState> {
    Router::new()
        .route("/api/verifications/:id", get(get_verification))
        .route("/api/verifications/:id/cancel", post(cancel_verification))
        .route("/api/verifications/:id/retry", post(retry_verification))
}

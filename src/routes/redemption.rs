//! Redemption route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn redemption_routes() -> Router<AppState> {
    Router::new()
        .route("/api/redemptions", post(create_redemption).get(list_redemptions))
        .route("/api/redemptions/:id", get(get_redemption))
        .route("/api/redemptions/:id/advance", post(advance_redemption))
        .route("/api/redemptions/:id/cancel", post(cancel_redemption))
}

//! Inventory monitor route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn monitor_routes() -> Router<AppState> {
    Router::new()
        .route("/api/monitor/sweep", post(run_sweep))
        .route(
            "/api/monitor/thresholds",
            get(get_thresholds).put(update_thresholds),
        )
}

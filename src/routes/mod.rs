//! Route definitions for the BeanVault API

use axum::{routing::get, Router};

use crate::handlers::health_check;
use crate::state::AppState;
use crate::websocket::ws_handler;

mod batch;
mod monitor;
mod redemption;
mod verification;

pub use batch::batch_routes;
pub use monitor::monitor_routes;
pub use redemption::redemption_routes;
pub use verification::verification_routes;

/// Every API route plus the websocket and health endpoints
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .merge(batch_routes())
        .merge(verification_routes())
        .merge(redemption_routes())
        .merge(monitor_routes())
}

//! Application state shared across handlers

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::auth::AuthConfig;
use crate::monitor::InventoryMonitor;
use crate::redemption::RedemptionService;
use crate::registry::BatchRegistry;
use crate::verification::VerificationOrchestrator;
use crate::websocket::WsState;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: BatchRegistry,
    pub orchestrator: VerificationOrchestrator,
    pub redemptions: RedemptionService,
    pub monitor: InventoryMonitor,
    pub ws_state: WsState,
    pub auth: AuthConfig,
    /// Present when redemptions are persisted in Postgres
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        registry: BatchRegistry,
        orchestrator: VerificationOrchestrator,
        redemptions: RedemptionService,
        monitor: InventoryMonitor,
        ws_state: WsState,
        auth: AuthConfig,
        db_pool: Option<PgPool>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            redemptions,
            monitor,
            ws_state,
            auth,
            db_pool,
        }
    }
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws_state.clone()
    }
}

impl FromRef<AppState> for AuthConfig {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth.clone()
    }
}

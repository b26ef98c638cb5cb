//! BeanVault Backend Server
//!
//! Serves the batch lifecycle API: metadata publishing, batch registration,
//! oracle verification, redemptions and inventory monitoring.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use beanvault_server::auth::AuthConfig;
use beanvault_server::config::Config;
use beanvault_server::db;
use beanvault_server::events::EventBus;
use beanvault_server::metadata::{
    HttpMetadataStore, InMemoryMetadataStore, MetadataPublisher, MetadataStore,
};
use beanvault_server::monitor::{start_monitor_scheduler, InventoryMonitor};
use beanvault_server::redemption::{
    InMemoryRedemptionRepository, PgRedemptionRepository, RedemptionRepository, RedemptionService,
};
use beanvault_server::registry::{BatchRegistry, Capability, SimulatedLedger};
use beanvault_server::routes;
use beanvault_server::state::AppState;
use beanvault_server::verification::{HttpOracleClient, PollPolicy, VerificationOrchestrator};
use beanvault_server::websocket::WsState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting BeanVault server");

    let events = EventBus::default();
    let ws_state = WsState::new(events.clone());

    // Metadata store
    let store: Arc<dyn MetadataStore> = match &config.metadata_store_url {
        Some(url) => {
            tracing::info!("Publishing metadata to {}", url);
            Arc::new(HttpMetadataStore::new(url).context("Invalid METADATA_STORE_URL")?)
        }
        None => {
            tracing::warn!("METADATA_STORE_URL not set, keeping metadata documents in memory");
            Arc::new(InMemoryMetadataStore::new())
        }
    };
    let publisher = MetadataPublisher::new(
        store,
        chrono::Duration::seconds(config.production_date_skew_seconds),
    );

    // Ledger and capabilities
    let ledger = Arc::new(SimulatedLedger::new());
    ledger.grant(&config.operator_identity, Capability::Mint).await;
    ledger
        .grant(&config.admin_identity, Capability::ManageThresholds)
        .await;
    ledger
        .grant(&config.fulfillment_identity, Capability::FulfillRedemption)
        .await;

    let registry = BatchRegistry::new(
        ledger,
        publisher,
        config.operator_identity.clone(),
        events.clone(),
    );

    // Redemption storage
    let db_pool = match &config.database_url {
        Some(url) => {
            tracing::info!(
                "Connecting to database at {}",
                config.database_url_masked().unwrap_or_default()
            );
            let pool = db::create_pool(url, config.db_max_connections).await?;
            db::run_migrations(&pool).await?;
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping redemptions in memory");
            None
        }
    };
    let repository: Arc<dyn RedemptionRepository> = match &db_pool {
        Some(pool) => Arc::new(PgRedemptionRepository::new(pool.clone())),
        None => Arc::new(InMemoryRedemptionRepository::new()),
    };
    let redemptions = RedemptionService::new(registry.clone(), repository, events.clone());

    // Oracle network
    let oracle = HttpOracleClient::new(&config.oracle_url, config.oracle_api_key.as_deref())
        .context("Invalid ORACLE_URL")?;
    let orchestrator = VerificationOrchestrator::new(
        registry.clone(),
        Arc::new(oracle),
        redemptions.clone(),
        PollPolicy::new(config.oracle_poll_interval(), config.oracle_max_poll_attempts)
            .with_retention(config.verification_retention()),
        events.clone(),
    );

    // Inventory monitor
    let monitor = InventoryMonitor::new(
        registry.clone(),
        orchestrator.clone(),
        events.clone(),
        config.thresholds.clone(),
        config.monitor_auto_reverify,
    );
    let mut scheduler = start_monitor_scheduler(monitor.clone(), &config.monitor_cron)
        .await
        .context("Failed to start inventory monitor scheduler")?;

    let app_state = AppState::new(
        registry,
        orchestrator,
        redemptions,
        monitor,
        ws_state,
        AuthConfig::new(config.jwt_secret.clone()),
        db_pool,
    );

    let app = routes::api_routes()
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("WebSocket available at ws://{}/ws", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Inventory monitor scheduler did not stop cleanly: {}", e);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let Some(allowed_origins) = allowed_origins else {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

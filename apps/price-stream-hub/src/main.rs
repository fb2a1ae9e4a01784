//! Price Stream Hub Binary
//!
//! Starts the price distribution hub.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream-hub
//! ```
//!
//! # Environment Variables (all optional)
//!
//! - `STREAM_HUB_API_PORT`: REST + WebSocket port (default: 8080)
//! - `STREAM_HUB_HEALTH_PORT`: Health check HTTP port (default: 8081)
//! - `STREAM_HUB_TICK_INTERVAL_MS`: Price tick period (default: 1000)
//! - `STREAM_HUB_CHANNEL_CAPACITY`: Per-connection queue depth (default: 256)
//! - `STREAM_HUB_STORE_PATH`: JSON subscription store path (default: in-memory)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-stream-hub)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_stream_hub::infrastructure::telemetry;
use price_stream_hub::{
    ApiServer, AppState, ChannelRegistry, HealthServer, HealthServerState, HubConfig, HubStats,
    InMemorySubscriptionStore, InstrumentCatalog, JsonFileSubscriptionStore, OpaqueTokenIdentity,
    PriceEngine, SubscriptionLedger, SubscriptionService, SubscriptionStore, TickDriver,
    TopicBroadcaster, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Price Stream Hub");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = HubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Composition root: every piece of shared state is built here and
    // injected by reference - no ambient singletons.
    let catalog = Arc::new(InstrumentCatalog::builtin());
    let engine = Arc::new(PriceEngine::new(Arc::clone(&catalog)));
    let registry = Arc::new(ChannelRegistry::new());
    let broadcaster = Arc::new(TopicBroadcaster::new(
        Arc::clone(&catalog),
        Arc::clone(&registry),
    ));

    let store: Arc<dyn SubscriptionStore> = match &config.storage.path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using JSON file subscription store");
            Arc::new(
                JsonFileSubscriptionStore::open(path)
                    .await
                    .with_context(|| format!("opening subscription store at {}", path.display()))?,
            )
        }
        None => {
            tracing::info!("using in-memory subscription store");
            Arc::new(InMemorySubscriptionStore::new())
        }
    };

    let ledger = Arc::new(SubscriptionLedger::new(Arc::clone(&catalog), store));
    let subscriptions = Arc::new(SubscriptionService::new(
        ledger,
        Arc::clone(&broadcaster),
        Arc::clone(&registry),
    ));

    let stats = Arc::new(HubStats::new());

    // Spawn the tick driver - the single writer for all price state.
    let tick_driver = TickDriver::new(
        Arc::clone(&engine),
        Arc::clone(&broadcaster),
        Arc::clone(&stats),
        config.engine.tick_interval,
        shutdown_token.clone(),
    );
    tokio::spawn(tick_driver.run());

    // Spawn the health server.
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.engine.tick_interval,
        Arc::clone(&stats),
        Arc::clone(&registry),
        Arc::clone(&broadcaster),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn the API server (REST + WebSocket).
    let app_state = AppState {
        catalog,
        engine,
        subscriptions,
        broadcaster,
        registry,
        identity: Arc::new(OpaqueTokenIdentity::new()),
        queue_capacity: config.channel.queue_capacity,
    };
    let api_server = ApiServer::new(config.server.api_port, app_state, shutdown_token.clone());
    tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Price stream hub ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Price stream hub stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        api_port = config.server.api_port,
        health_port = config.server.health_port,
        tick_interval_ms = config.engine.tick_interval.as_millis() as u64,
        channel_capacity = config.channel.queue_capacity,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

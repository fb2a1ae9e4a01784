//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, tick status reporting, and
//! Prometheus metrics. Used by container orchestrators, load balancers,
//! and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (checks tick freshness)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::HubStats;
use crate::infrastructure::broadcast::{SharedBroadcaster, SharedRegistry};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "unhealthy".
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Tick driver status.
    pub ticks: TickStatus,
    /// Live connection counts.
    pub channels: ChannelStatus,
    /// Topic membership counts.
    pub topics: TopicStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Tick driver is producing fresh snapshots.
    Healthy,
    /// No tick yet, or the last one is too old.
    Unhealthy,
}

/// Tick driver status.
#[derive(Debug, Clone, Serialize)]
pub struct TickStatus {
    /// Ticks completed since startup.
    pub count: u64,
    /// Milliseconds since the last tick, if any.
    pub last_tick_age_ms: Option<u64>,
}

/// Live connection counts.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    /// Registered channels.
    pub active: usize,
}

/// Topic membership counts.
#[derive(Debug, Clone, Serialize)]
pub struct TopicStatus {
    /// Topics touched so far.
    pub count: usize,
    /// Memberships across all topics.
    pub total_members: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    tick_period: Duration,
    stats: Arc<HubStats>,
    registry: SharedRegistry,
    broadcaster: SharedBroadcaster,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        tick_period: Duration,
        stats: Arc<HubStats>,
        registry: SharedRegistry,
        broadcaster: SharedBroadcaster,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            tick_period,
            stats,
            registry,
            broadcaster,
        }
    }

    /// A tick is fresh while it is younger than three periods.
    fn tick_is_fresh(&self) -> bool {
        self.stats
            .last_tick_age()
            .is_some_and(|age| age < self.tick_period * 3)
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.tick_is_fresh() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let status = if state.tick_is_fresh() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        ticks: TickStatus {
            count: state.stats.tick_count(),
            last_tick_age_ms: state
                .stats
                .last_tick_age()
                .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX)),
        },
        channels: ChannelStatus {
            active: state.registry.len(),
        },
        topics: TopicStatus {
            count: state.broadcaster.topic_count(),
            total_members: state.broadcaster.total_members(),
        },
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

//! HTTP API (Driver Adapter)
//!
//! Axum-based REST surface mirroring the upstream dashboard routes, plus
//! the WebSocket endpoint the push transport rides on.
//!
//! # Endpoints
//!
//! - `GET  /api/stocks` - all instruments with current price state
//! - `GET  /api/stocks/{symbol}` - one instrument (404 if unknown)
//! - `POST /api/subscribe` - durable subscribe (authenticated)
//! - `POST /api/unsubscribe` - durable unsubscribe (authenticated)
//! - `GET  /api/subscriptions` - caller's durable set (authenticated)
//! - `GET  /ws` - WebSocket upgrade for the price stream
//!
//! Responses use the `{ success, data | message }` envelope the original
//! service exposed.

pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::IdentityResolver;
use crate::application::services::SubscriptionService;
use crate::domain::catalog::SharedCatalog;
use crate::domain::ledger::{LedgerError, UserId};
use crate::domain::pricing::{PriceEngine, PriceUpdate};
use crate::infrastructure::broadcast::{SharedBroadcaster, SharedRegistry};

// =============================================================================
// Application state
// =============================================================================

/// Shared state for the API handlers and the WebSocket transport.
#[derive(Clone)]
pub struct AppState {
    /// Instrument catalog.
    pub catalog: SharedCatalog,
    /// Price engine (read-side access only).
    pub engine: Arc<PriceEngine>,
    /// Subscription orchestration.
    pub subscriptions: Arc<SubscriptionService>,
    /// Topic membership and fan-out.
    pub broadcaster: SharedBroadcaster,
    /// Live channel registry.
    pub registry: SharedRegistry,
    /// Identity collaborator.
    pub identity: Arc<dyn IdentityResolver>,
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stocks", get(list_stocks))
        .route("/api/stocks/{symbol}", get(get_stock))
        .route("/api/subscribe", post(subscribe))
        .route("/api/unsubscribe", post(unsubscribe))
        .route("/api/subscriptions", get(list_subscriptions))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

// =============================================================================
// API server
// =============================================================================

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// The REST + WebSocket HTTP server.
pub struct ApiServer {
    port: u16,
    state: AppState,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, state: AppState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ApiServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ApiServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiServerError::ServerFailed(e.to_string()))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

// =============================================================================
// Envelope and errors
// =============================================================================

/// Response envelope matching the original service's shape.
#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data: Some(data),
        message: None,
    })
}

fn ok_message<T: Serialize>(data: Option<T>, message: impl Into<String>) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
        message: Some(message.into()),
    })
}

/// API failure, mapped to a status code and an error envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Symbol not present in the catalog (subscribe path).
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Instrument lookup miss.
    #[error("stock not found: {0}")]
    NotFound(String),

    /// Missing or unresolvable credential.
    #[error("invalid or missing credential")]
    Unauthorized,

    /// Durable store failure; the caller may retry.
    #[error("subscription store unavailable: {0}")]
    Persistence(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnknownSymbol(symbol) => Self::UnknownSymbol(symbol),
            LedgerError::Persistence(e) => Self::Persistence(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownSymbol(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Persistence(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(Envelope::<()> {
            success: false,
            data: None,
            message: Some(self.to_string()),
        });
        (status, body).into_response()
    }
}

// =============================================================================
// Authentication
// =============================================================================

/// Resolve the caller's identity from the `Authorization` header.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
        .ok_or(ApiError::Unauthorized)?;

    state
        .identity
        .resolve(credential)
        .await
        .map_err(|_| ApiError::Unauthorized)
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_stocks(State(state): State<AppState>) -> Json<Envelope<Vec<PriceUpdate>>> {
    ok(state.engine.all())
}

async fn get_stock(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Envelope<PriceUpdate>>, ApiError> {
    state
        .engine
        .get(&symbol)
        .map(ok)
        .ok_or(ApiError::NotFound(symbol))
}

/// Subscribe request body.
#[derive(Debug, Deserialize)]
struct SymbolRequest {
    symbol: String,
}

async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SymbolRequest>,
) -> Result<Json<Envelope<PriceUpdate>>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    state.subscriptions.subscribe(&user, &req.symbol).await?;

    let current = state
        .engine
        .get(&req.symbol)
        .ok_or_else(|| ApiError::NotFound(req.symbol.clone()))?;
    Ok(ok_message(
        Some(current),
        format!("Successfully subscribed to {}", req.symbol),
    ))
}

async fn unsubscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SymbolRequest>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    state.subscriptions.unsubscribe(&user, &req.symbol).await?;
    Ok(ok_message(
        None,
        format!("Successfully unsubscribed from {}", req.symbol),
    ))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Envelope<Vec<PriceUpdate>>>, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let symbols = state.subscriptions.list(&user).await?;

    // Catalog order keeps the response stable across calls.
    let stocks = state
        .catalog
        .iter()
        .filter(|i| symbols.contains(&i.symbol))
        .filter_map(|i| state.engine.get(&i.symbol))
        .collect();
    Ok(ok(stocks))
}

// =============================================================================
// Tests
// =============================================================================

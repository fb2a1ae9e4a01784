#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Price Stream Hub - Simulated Market Data Fan-Out
//!
//! Distributes continuously-changing price values for a small fixed set
//! of instruments to many concurrently connected observers, each of
//! which watches its own subset of symbols.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core types and logic with no I/O
//!   - `catalog`: instrument registry
//!   - `pricing`: price states and the tick engine
//!   - `ledger`: durable per-user subscription records
//!   - `continuity`: observer-side staleness state machine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: identity collaborator interface
//!   - `services`: tick driver, subscription orchestration, staleness
//!     monitor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `broadcast`: topic membership and fan-out
//!   - `http`: REST API + WebSocket transport
//!   - `persistence`: subscription store adapters
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!               tick (1s)
//! Price Engine ──────────► Topic Broadcaster ──► joined channels only
//!                               ▲
//!        join/leave (ephemeral) │ reconcile (durable replay)
//!               WebSocket ──────┴────── Subscription Ledger ── store
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - core types and logic with no I/O.
pub mod domain;

/// Application layer - use cases and port definitions.
pub mod application;

/// Infrastructure layer - adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::catalog::{Instrument, InstrumentCatalog, SharedCatalog, Symbol};
pub use domain::continuity::{
    ContinuityConfig, ContinuityController, DisplayUpdate, FeedState,
};
pub use domain::ledger::{
    LedgerError, StoreError, SubscriptionLedger, SubscriptionStore, UserId,
};
pub use domain::pricing::{
    MAX_WALK_PERCENT, MIN_VISIBLE_DELTA, NUDGE_MAGNITUDE, PRICE_FLOOR, PriceEngine,
    PriceSnapshot, PriceState, PriceUpdate,
};

// Application services and ports
pub use application::ports::{IdentityError, IdentityResolver, OpaqueTokenIdentity};
pub use application::services::{
    HubStats, StalenessMonitor, SubscriptionService, TickDriver,
};

// Infrastructure
pub use infrastructure::broadcast::{
    ChannelId, ChannelRegistry, PublishOutcome, SharedBroadcaster, SharedRegistry,
    TopicBroadcaster,
};
pub use infrastructure::config::{ConfigError, HubConfig};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::http::{ApiError, ApiServer, ApiServerError, AppState, router};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::persistence::{InMemorySubscriptionStore, JsonFileSubscriptionStore};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

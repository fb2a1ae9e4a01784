//! Observer Continuity Controller
//!
//! Client-side state machine that keeps a displayed price moving when the
//! live feed stalls. Per symbol, the feed is **Live** while the last
//! authoritative update is younger than the staleness window, and
//! **Synthesized** once the window is exceeded: each check interval then
//! produces a one-step walk from the last displayed value, using the same
//! distribution shape as the engine.
//!
//! Synthesized values are advisory. The moment an authoritative update
//! arrives the overlay is discarded in full - never blended - and the
//! symbol snaps back to Live.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::domain::catalog::Symbol;
use crate::domain::pricing::{self, MAX_WALK_PERCENT, PriceUpdate};

// =============================================================================
// Types
// =============================================================================

/// Continuity timing parameters.
#[derive(Debug, Clone, Copy)]
pub struct ContinuityConfig {
    /// Maximum tolerated gap since the last authoritative update.
    pub staleness_window: Duration,
    /// How often stale symbols are re-checked and re-synthesized.
    pub check_interval: Duration,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            staleness_window: Duration::from_secs(2),
            check_interval: Duration::from_secs(1),
        }
    }
}

/// Whether a symbol's displayed value is authoritative or synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Last authoritative update is within the staleness window.
    Live,
    /// Window exceeded; the display is a local estimate.
    Synthesized,
}

/// One display-stream item: the value to show and its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayUpdate {
    /// The value to display.
    #[serde(flatten)]
    pub update: PriceUpdate,
    /// True when the value was synthesized locally.
    pub synthetic: bool,
}

#[derive(Debug)]
struct SymbolTrack {
    displayed: PriceUpdate,
    received_at: Instant,
    state: FeedState,
}

// =============================================================================
// Controller
// =============================================================================

/// Per-symbol staleness tracking and local synthesis.
///
/// Time is passed in explicitly so the transitions are deterministic
/// under test; the async wrapper lives in the application layer.
pub struct ContinuityController {
    config: ContinuityConfig,
    tracks: HashMap<Symbol, SymbolTrack>,
    rng: StdRng,
}

impl ContinuityController {
    /// Create a controller seeded from the OS entropy source.
    #[must_use]
    pub fn new(config: ContinuityConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Create a controller with a fixed seed, for deterministic tests.
    #[must_use]
    pub fn with_seed(config: ContinuityConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ContinuityConfig, rng: StdRng) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
            rng,
        }
    }

    /// Record an authoritative update.
    ///
    /// Replaces any synthesized overlay outright and returns the value to
    /// display (always the authoritative one).
    pub fn record(&mut self, update: PriceUpdate, now: Instant) -> DisplayUpdate {
        let track = SymbolTrack {
            displayed: update.clone(),
            received_at: now,
            state: FeedState::Live,
        };
        self.tracks.insert(update.symbol.clone(), track);
        DisplayUpdate {
            update,
            synthetic: false,
        }
    }

    /// Check every tracked symbol against the staleness window and
    /// synthesize one walk step for each stale one.
    ///
    /// Called once per check interval. The synthesized value becomes the
    /// new displayed value, so a long stall keeps walking rather than
    /// oscillating around the last authoritative price.
    pub fn poll(&mut self, now: Instant) -> Vec<DisplayUpdate> {
        let mut synthesized = Vec::new();

        for track in self.tracks.values_mut() {
            let age = now.saturating_duration_since(track.received_at);
            if age < self.config.staleness_window {
                continue;
            }

            track.state = FeedState::Synthesized;
            let percent = self.rng.random_range(-MAX_WALK_PERCENT..=MAX_WALK_PERCENT);
            let nudge_up = self.rng.random_bool(0.5);
            let state = pricing::step(track.displayed.price, percent, nudge_up);

            track.displayed =
                PriceUpdate::from_state(&track.displayed.symbol, &track.displayed.name, state);
            synthesized.push(DisplayUpdate {
                update: track.displayed.clone(),
                synthetic: true,
            });
        }

        synthesized
    }

    /// Current feed state for a symbol, if it has ever been seen.
    #[must_use]
    pub fn state(&self, symbol: &str) -> Option<FeedState> {
        self.tracks.get(symbol).map(|t| t.state)
    }

    /// Currently displayed value for a symbol.
    #[must_use]
    pub fn displayed(&self, symbol: &str) -> Option<&PriceUpdate> {
        self.tracks.get(symbol).map(|t| &t.displayed)
    }

    /// The configured timing parameters.
    #[must_use]
    pub const fn config(&self) -> ContinuityConfig {
        self.config
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Price Engine
//!
//! Owns the current and previous price for every catalog instrument and
//! advances all of them once per tick with a bounded random walk.
//!
//! # Walk
//!
//! Each tick draws a percentage move uniformly from [-1%, +1%] of the
//! current price. If the resulting absolute move would be smaller than
//! [`MIN_VISIBLE_DELTA`], it is replaced with a fixed ±[`NUDGE_MAGNITUDE`]
//! nudge whose sign is drawn independently, so every tick is visibly
//! different from the last. Prices are clamped to [`PRICE_FLOOR`].
//!
//! # Concurrency
//!
//! `tick()` mutates all instruments as one batch under a write lock; the
//! snapshot it returns is immutable. Only the tick driver calls `tick()` -
//! every other caller uses the read-side accessors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{SharedCatalog, Symbol};

// =============================================================================
// Walk parameters
// =============================================================================

/// Minimum price any instrument can reach.
pub const PRICE_FLOOR: f64 = 0.01;

/// Absolute moves below this threshold are replaced with a nudge.
pub const MIN_VISIBLE_DELTA: f64 = 0.01;

/// Magnitude of the forced nudge when the raw draw is too small.
pub const NUDGE_MAGNITUDE: f64 = 0.05;

/// Half-width of the uniform percentage draw.
pub const MAX_WALK_PERCENT: f64 = 1.0;

// =============================================================================
// Types
// =============================================================================

/// Per-instrument price state after a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceState {
    /// Current price, >= [`PRICE_FLOOR`].
    pub price: f64,
    /// Price before the last tick.
    pub previous_price: f64,
    /// `price - previous_price`.
    pub change: f64,
    /// `change / previous_price * 100`.
    pub change_percent: f64,
}

impl PriceState {
    /// Initial state seeded from a base price: no movement yet.
    #[must_use]
    pub const fn seeded(base_price: f64) -> Self {
        Self {
            price: base_price,
            previous_price: base_price,
            change: 0.0,
            change_percent: 0.0,
        }
    }
}

/// One instrument's update as pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Instrument symbol (also the topic name).
    pub symbol: Symbol,
    /// Display name.
    pub name: String,
    /// Current price.
    pub price: f64,
    /// Price before the last tick.
    pub previous_price: f64,
    /// Absolute change.
    pub change: f64,
    /// Percentage change.
    pub change_percent: f64,
}

impl PriceUpdate {
    /// Assemble an update from a state plus instrument metadata.
    #[must_use]
    pub fn from_state(symbol: &str, name: &str, state: PriceState) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            price: state.price,
            previous_price: state.previous_price,
            change: state.change,
            change_percent: state.change_percent,
        }
    }
}

/// Immutable batch of updates produced by one tick.
pub type PriceSnapshot = Arc<Vec<PriceUpdate>>;

// =============================================================================
// Walk arithmetic
// =============================================================================

/// Advance one price by one walk step.
///
/// `percent` is the raw uniform draw in [-1, +1]; `nudge_up` is the
/// independently drawn sign used when the raw move is below
/// [`MIN_VISIBLE_DELTA`]. Pure so tests can force exact deltas.
#[must_use]
pub fn step(previous: f64, percent: f64, nudge_up: bool) -> PriceState {
    let mut delta = previous * percent / 100.0;
    if delta.abs() < MIN_VISIBLE_DELTA {
        delta = if nudge_up {
            NUDGE_MAGNITUDE
        } else {
            -NUDGE_MAGNITUDE
        };
    }

    let price = (previous + delta).max(PRICE_FLOOR);
    let change = price - previous;
    PriceState {
        price,
        previous_price: previous,
        change,
        change_percent: change / previous * 100.0,
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Advances every catalog instrument once per tick.
pub struct PriceEngine {
    catalog: SharedCatalog,
    states: RwLock<HashMap<Symbol, PriceState>>,
    rng: Mutex<StdRng>,
    ticks: AtomicU64,
}

impl PriceEngine {
    /// Create an engine seeded from the OS entropy source.
    #[must_use]
    pub fn new(catalog: SharedCatalog) -> Self {
        Self::with_rng(catalog, StdRng::from_os_rng())
    }

    /// Create an engine with a fixed seed, for deterministic tests.
    #[must_use]
    pub fn with_seed(catalog: SharedCatalog, seed: u64) -> Self {
        Self::with_rng(catalog, StdRng::seed_from_u64(seed))
    }

    fn with_rng(catalog: SharedCatalog, rng: StdRng) -> Self {
        let states = catalog
            .iter()
            .map(|i| (i.symbol.clone(), PriceState::seeded(i.base_price)))
            .collect();
        Self {
            catalog,
            states: RwLock::new(states),
            rng: Mutex::new(rng),
            ticks: AtomicU64::new(0),
        }
    }

    /// Advance every instrument exactly once and return the post-tick
    /// snapshot.
    ///
    /// The whole batch mutates under one write lock, so readers never see
    /// a half-updated instrument. Intended to be called by the tick driver
    /// only.
    pub fn tick(&self) -> PriceSnapshot {
        let mut rng = self.rng.lock();
        let mut states = self.states.write();
        let mut updates = Vec::with_capacity(self.catalog.len());

        for instrument in self.catalog.iter() {
            let Some(state) = states.get_mut(&instrument.symbol) else {
                continue;
            };
            let percent = rng.random_range(-MAX_WALK_PERCENT..=MAX_WALK_PERCENT);
            let nudge_up = rng.random_bool(0.5);
            *state = step(state.price, percent, nudge_up);
            updates.push(PriceUpdate::from_state(
                &instrument.symbol,
                &instrument.name,
                *state,
            ));
        }
        drop(states);
        drop(rng);

        self.ticks.fetch_add(1, Ordering::Relaxed);
        Arc::new(updates)
    }

    /// Current state of one instrument, as an update payload.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<PriceUpdate> {
        let instrument = self.catalog.get(symbol)?;
        let states = self.states.read();
        states
            .get(symbol)
            .map(|state| PriceUpdate::from_state(&instrument.symbol, &instrument.name, *state))
    }

    /// Current state of every instrument, in catalog order.
    #[must_use]
    pub fn all(&self) -> Vec<PriceUpdate> {
        let states = self.states.read();
        self.catalog
            .iter()
            .filter_map(|instrument| {
                states.get(&instrument.symbol).map(|state| {
                    PriceUpdate::from_state(&instrument.symbol, &instrument.name, *state)
                })
            })
            .collect()
    }

    /// Number of ticks performed so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

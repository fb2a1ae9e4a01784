//! Instrument Catalog
//!
//! Static catalog of the instruments the hub distributes prices for.
//! Built once at startup, never mutated, and injected (`Arc`) into every
//! component that needs to validate or enumerate symbols.

use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// Types
// =============================================================================

/// A symbol string identifying one instrument (and its topic).
pub type Symbol = String;

/// One tradable instrument: symbol, display name, and the price seed.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    /// Unique symbol key.
    pub symbol: Symbol,
    /// Human-readable display name.
    pub name: String,
    /// Immutable seed price for the walk.
    pub base_price: f64,
}

/// The built-in instrument set.
const SUPPORTED_INSTRUMENTS: &[(&str, &str, f64)] = &[
    ("GOOG", "Google", 142.50),
    ("TSLA", "Tesla", 248.75),
    ("AMZN", "Amazon", 178.30),
    ("META", "Meta", 485.20),
    ("NVDA", "NVIDIA", 495.80),
];

// =============================================================================
// Catalog
// =============================================================================

/// Immutable lookup table of instruments, in stable iteration order.
#[derive(Debug)]
pub struct InstrumentCatalog {
    instruments: Vec<Instrument>,
    by_symbol: HashMap<Symbol, usize>,
}

/// Shared catalog reference.
pub type SharedCatalog = Arc<InstrumentCatalog>;

impl InstrumentCatalog {
    /// Build a catalog from an instrument list.
    ///
    /// A duplicate symbol keeps the first occurrence.
    #[must_use]
    pub fn new(instruments: Vec<Instrument>) -> Self {
        let mut by_symbol = HashMap::with_capacity(instruments.len());
        for (idx, instrument) in instruments.iter().enumerate() {
            by_symbol.entry(instrument.symbol.clone()).or_insert(idx);
        }
        Self {
            instruments,
            by_symbol,
        }
    }

    /// The built-in five-instrument catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(
            SUPPORTED_INSTRUMENTS
                .iter()
                .map(|(symbol, name, base_price)| Instrument {
                    symbol: (*symbol).to_string(),
                    name: (*name).to_string(),
                    base_price: *base_price,
                })
                .collect(),
        )
    }

    /// Look up one instrument by symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.by_symbol.get(symbol).map(|idx| &self.instruments[*idx])
    }

    /// Whether the symbol exists in the catalog.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.by_symbol.contains_key(symbol)
    }

    /// Iterate instruments in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter()
    }

    /// All symbols, in catalog order.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.instruments.iter().map(|i| i.symbol.clone()).collect()
    }

    /// Number of instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

impl Default for InstrumentCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// =============================================================================
// Tests
// =============================================================================

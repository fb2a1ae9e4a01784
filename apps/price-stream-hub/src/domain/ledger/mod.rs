//! Subscription Ledger
//!
//! Durable mapping from user identity to the set of symbols they are
//! subscribed to - the source of truth across sessions. Writes go to the
//! backing store before success is reported, so the ledger always leads
//! the live membership mirror.
//!
//! # Concurrency
//!
//! Each user's read-modify-write cycle runs under that user's own async
//! mutex: two concurrent subscribes for one user union their symbols
//! instead of clobbering each other, and different users never contend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::catalog::{SharedCatalog, Symbol};

/// Stable user identity, as resolved by the identity collaborator.
pub type UserId = String;

// =============================================================================
// Store port
// =============================================================================

/// Durable-store failure, surfaced to the caller of the mutating operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("subscription store i/o: {0}")]
    Io(String),

    /// Stored data could not be decoded.
    #[error("subscription store corrupt: {0}")]
    Corrupt(String),
}

/// Port for the durable subscription store collaborator.
///
/// Keyed by user identity; the hub never interprets the storage format.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Load the stored symbol set for a user, `None` if no record exists.
    async fn load(&self, user: &str) -> Result<Option<HashSet<Symbol>>, StoreError>;

    /// Persist the full symbol set for a user.
    async fn save(&self, user: &str, symbols: &HashSet<Symbol>) -> Result<(), StoreError>;
}

// =============================================================================
// Errors
// =============================================================================

/// Ledger operation failures.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The symbol is not in the instrument catalog; nothing was mutated.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),

    /// The durable store failed; the record is unchanged and the live
    /// mirror must not be updated.
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

// =============================================================================
// Ledger
// =============================================================================

/// Durable per-user subscription records over a [`SubscriptionStore`].
pub struct SubscriptionLedger {
    catalog: SharedCatalog,
    store: Arc<dyn SubscriptionStore>,
    user_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SubscriptionLedger {
    /// Create a ledger over the given catalog and store.
    #[must_use]
    pub fn new(catalog: SharedCatalog, store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            catalog,
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock();
        Arc::clone(
            locks
                .entry(user.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Idempotently add `symbol` to the user's durable set.
    ///
    /// Returns the post-operation set.
    ///
    /// # Errors
    ///
    /// `UnknownSymbol` if the catalog lacks the symbol (checked before any
    /// mutation); `Persistence` if the store write failed, in which case
    /// the durable record is unchanged.
    pub async fn subscribe(
        &self,
        user: &str,
        symbol: &str,
    ) -> Result<HashSet<Symbol>, LedgerError> {
        if !self.catalog.contains(symbol) {
            return Err(LedgerError::UnknownSymbol(symbol.to_string()));
        }

        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        let mut symbols = self.store.load(user).await?.unwrap_or_default();
        if symbols.insert(symbol.to_string()) {
            self.store.save(user, &symbols).await?;
        }
        Ok(symbols)
    }

    /// Idempotently remove `symbol` from the user's durable set.
    ///
    /// Removing an absent (or unknown) symbol is a successful no-op.
    ///
    /// # Errors
    ///
    /// `Persistence` if the store write failed.
    pub async fn unsubscribe(
        &self,
        user: &str,
        symbol: &str,
    ) -> Result<HashSet<Symbol>, LedgerError> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        let mut symbols = self.store.load(user).await?.unwrap_or_default();
        if symbols.remove(symbol) {
            self.store.save(user, &symbols).await?;
        }
        Ok(symbols)
    }

    /// The user's current durable set.
    ///
    /// Creates (and persists) an empty record the first time a user is
    /// seen, so the record outlives its symbols.
    ///
    /// # Errors
    ///
    /// `Persistence` if the store read or record creation failed.
    pub async fn list(&self, user: &str) -> Result<HashSet<Symbol>, LedgerError> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().await;

        match self.store.load(user).await? {
            Some(symbols) => Ok(symbols),
            None => {
                let empty = HashSet::new();
                self.store.save(user, &empty).await?;
                Ok(empty)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

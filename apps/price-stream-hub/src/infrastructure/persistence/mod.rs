//! Subscription Store Adapters
//!
//! Implementations of the durable-store port: an in-memory map for tests
//! and development, and a JSON document on disk for actual durability
//! across restarts.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::catalog::Symbol;
use crate::domain::ledger::{StoreError, SubscriptionStore};

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory implementation of [`SubscriptionStore`].
///
/// Suitable for testing and development. The failure toggle lets tests
/// exercise the persistence-failure path deterministically.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    records: RwLock<HashMap<String, HashSet<Symbol>>>,
    fail_writes: AtomicBool,
}

impl InMemorySubscriptionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save` fail until toggled back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of user records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no record is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn load(&self, user: &str) -> Result<Option<HashSet<Symbol>>, StoreError> {
        Ok(self.records.read().get(user).cloned())
    }

    async fn save(&self, user: &str, symbols: &HashSet<Symbol>) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Io("write failure injected".to_string()));
        }
        self.records
            .write()
            .insert(user.to_string(), symbols.clone());
        Ok(())
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// File-backed implementation of [`SubscriptionStore`].
///
/// The whole record map lives in one JSON document, cached in memory and
/// rewritten atomically (temp file + rename) on every save. Fine for the
/// small fixed user population this hub serves.
#[derive(Debug)]
pub struct JsonFileSubscriptionStore {
    path: PathBuf,
    records: tokio::sync::Mutex<HashMap<String, HashSet<Symbol>>>,
}

impl JsonFileSubscriptionStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// `StoreError::Io` if the file exists but cannot be read,
    /// `StoreError::Corrupt` if it cannot be decoded.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        Ok(Self {
            path,
            records: tokio::sync::Mutex::new(records),
        })
    }

    async fn persist(
        &self,
        records: &HashMap<String, HashSet<Symbol>>,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl SubscriptionStore for JsonFileSubscriptionStore {
    async fn load(&self, user: &str) -> Result<Option<HashSet<Symbol>>, StoreError> {
        Ok(self.records.lock().await.get(user).cloned())
    }

    async fn save(&self, user: &str, symbols: &HashSet<Symbol>) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let previous = records.insert(user.to_string(), symbols.clone());

        if let Err(e) = self.persist(&records).await {
            // Keep cache and disk aligned: roll the cache back.
            match previous {
                Some(set) => records.insert(user.to_string(), set),
                None => records.remove(user),
            };
            return Err(e);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

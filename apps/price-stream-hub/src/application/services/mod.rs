//! Application Services
//!
//! Services that orchestrate domain logic:
//!
//! - [`TickDriver`]: the single periodic writer that advances the price
//!   engine and triggers topic fan-out.
//! - [`SubscriptionService`]: durable-first subscription handling and the
//!   durable-to-live reconcile path.
//! - [`StalenessMonitor`]: async wrapper around the observer-side
//!   continuity controller.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::catalog::Symbol;
use crate::domain::continuity::{ContinuityController, DisplayUpdate};
use crate::domain::ledger::{LedgerError, SubscriptionLedger};
use crate::domain::pricing::{PriceEngine, PriceUpdate};
use crate::infrastructure::broadcast::{ChannelId, SharedBroadcaster, SharedRegistry};
use crate::infrastructure::metrics::{self, LedgerOp};

// =============================================================================
// Hub statistics
// =============================================================================

/// Shared tick statistics, read by the health server.
#[derive(Debug, Default)]
pub struct HubStats {
    ticks: AtomicU64,
    last_tick_at: RwLock<Option<Instant>>,
}

impl HubStats {
    /// Create empty stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed tick.
    pub fn note_tick(&self, at: Instant) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        *self.last_tick_at.write() = Some(at);
    }

    /// Ticks completed since startup.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Age of the most recent tick, if any.
    #[must_use]
    pub fn last_tick_age(&self) -> Option<Duration> {
        self.last_tick_at.read().map(|at| at.elapsed())
    }
}

// =============================================================================
// Tick driver
// =============================================================================

/// The periodic tick task: advances the engine and fans the snapshot out.
///
/// This is the only caller of [`PriceEngine::tick`]; everything else
/// reads immutable snapshots.
pub struct TickDriver {
    engine: Arc<PriceEngine>,
    broadcaster: SharedBroadcaster,
    stats: Arc<HubStats>,
    period: Duration,
    cancel: CancellationToken,
}

impl TickDriver {
    /// Create a driver with the given tick period.
    #[must_use]
    pub fn new(
        engine: Arc<PriceEngine>,
        broadcaster: SharedBroadcaster,
        stats: Arc<HubStats>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            broadcaster,
            stats,
            period,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(period_ms = self.period.as_millis() as u64, "tick driver started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let snapshot = self.engine.tick();
                    let outcome = self.broadcaster.publish(&snapshot);
                    metrics::record_tick();
                    self.stats.note_tick(Instant::now());
                    tracing::debug!(
                        instruments = snapshot.len(),
                        delivered = outcome.delivered,
                        failed = outcome.failed,
                        "tick published"
                    );
                }
            }
        }

        tracing::info!("tick driver stopped");
    }
}

// =============================================================================
// Subscription service
// =============================================================================

/// Durable-first subscription orchestration.
///
/// Every mutation goes to the ledger (durable) before the live mirror is
/// touched, so a crash between the two leaves the ledger authoritative
/// and `reconcile` self-heals on the next reconnect.
pub struct SubscriptionService {
    ledger: Arc<SubscriptionLedger>,
    broadcaster: SharedBroadcaster,
    registry: SharedRegistry,
}

impl SubscriptionService {
    /// Create the service.
    #[must_use]
    pub fn new(
        ledger: Arc<SubscriptionLedger>,
        broadcaster: SharedBroadcaster,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            ledger,
            broadcaster,
            registry,
        }
    }

    /// Durably subscribe `user` to `symbol`, then join the user's live
    /// channels to the topic.
    ///
    /// # Errors
    ///
    /// `UnknownSymbol` or `Persistence` from the ledger; on either, no
    /// live membership changes.
    pub async fn subscribe(
        &self,
        user: &str,
        symbol: &str,
    ) -> Result<HashSet<Symbol>, LedgerError> {
        let result = self.ledger.subscribe(user, symbol).await;
        metrics::record_ledger_op(LedgerOp::Subscribe, result.is_ok());
        let symbols = result?;

        for channel in self.registry.channels_for_user(user) {
            self.broadcaster.join(channel, symbol);
        }
        tracing::info!(user, symbol, "subscribed");
        Ok(symbols)
    }

    /// Durably unsubscribe, then drop the topic from the user's live
    /// channels.
    ///
    /// # Errors
    ///
    /// `Persistence` from the ledger; live membership is untouched then.
    pub async fn unsubscribe(
        &self,
        user: &str,
        symbol: &str,
    ) -> Result<HashSet<Symbol>, LedgerError> {
        let result = self.ledger.unsubscribe(user, symbol).await;
        metrics::record_ledger_op(LedgerOp::Unsubscribe, result.is_ok());
        let symbols = result?;

        for channel in self.registry.channels_for_user(user) {
            self.broadcaster.leave(channel, symbol);
        }
        tracing::info!(user, symbol, "unsubscribed");
        Ok(symbols)
    }

    /// The user's current durable set.
    ///
    /// # Errors
    ///
    /// `Persistence` from the ledger.
    pub async fn list(&self, user: &str) -> Result<HashSet<Symbol>, LedgerError> {
        let result = self.ledger.list(user).await;
        metrics::record_ledger_op(LedgerOp::List, result.is_ok());
        result
    }

    /// Bring a channel's live membership in line with the user's durable
    /// record: bind the identity, then join every ledger symbol.
    ///
    /// This is the replay path on every connect/reconnect; ephemeral
    /// joins from previous sessions are gone by construction, since they
    /// died with their channel.
    ///
    /// # Errors
    ///
    /// `Persistence` if the ledger read fails; no membership changes.
    pub async fn reconcile(
        &self,
        channel: ChannelId,
        user: &str,
    ) -> Result<usize, LedgerError> {
        let symbols = self.ledger.list(user).await?;
        self.registry.bind_user(channel, user);
        for symbol in &symbols {
            self.broadcaster.join(channel, symbol);
        }
        tracing::info!(%channel, user, topics = symbols.len(), "reconciled");
        Ok(symbols.len())
    }
}

// =============================================================================
// Staleness monitor
// =============================================================================

/// Async wrapper around the continuity controller.
///
/// Consumes authoritative updates from `updates`, checks staleness on
/// its own interval (independent of the hub's tick timer), and emits
/// every displayable value - authoritative and synthesized - on
/// `display`.
pub struct StalenessMonitor {
    controller: ContinuityController,
    updates: mpsc::Receiver<PriceUpdate>,
    display: mpsc::Sender<DisplayUpdate>,
    cancel: CancellationToken,
}

impl StalenessMonitor {
    /// Create a monitor around an existing controller.
    #[must_use]
    pub const fn new(
        controller: ContinuityController,
        updates: mpsc::Receiver<PriceUpdate>,
        display: mpsc::Sender<DisplayUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller,
            updates,
            display,
            cancel,
        }
    }

    /// Run until cancelled or both channels close.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.controller.config().check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                update = self.updates.recv() => {
                    let Some(update) = update else { break };
                    let shown = self.controller.record(update, Instant::now());
                    if self.display.send(shown).await.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    for shown in self.controller.poll(Instant::now()) {
                        if self.display.send(shown).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::catalog::InstrumentCatalog;
    use crate::domain::continuity::ContinuityConfig;
    use crate::domain::ledger::SubscriptionStore;
    use crate::infrastructure::broadcast::{ChannelRegistry, TopicBroadcaster};
    use crate::infrastructure::persistence::InMemorySubscriptionStore;

    struct Harness {
        service: SubscriptionService,
        broadcaster: SharedBroadcaster,
        registry: SharedRegistry,
        engine: Arc<PriceEngine>,
        store: Arc<InMemorySubscriptionStore>,
    }

    fn harness() -> Harness {
        let catalog = Arc::new(InstrumentCatalog::builtin());
        let registry = Arc::new(ChannelRegistry::new());
        let broadcaster = Arc::new(TopicBroadcaster::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
        ));
        let store = Arc::new(InMemorySubscriptionStore::new());
        let ledger = Arc::new(SubscriptionLedger::new(
            Arc::clone(&catalog),
            Arc::clone(&store) as Arc<dyn SubscriptionStore>,
        ));
        let engine = Arc::new(PriceEngine::with_seed(catalog, 23));
        let service = SubscriptionService::new(
            ledger,
            Arc::clone(&broadcaster),
            Arc::clone(&registry),
        );
        Harness {
            service,
            broadcaster,
            registry,
            engine,
            store,
        }
    }

    fn connect(registry: &ChannelRegistry) -> (ChannelId, mpsc::Receiver<PriceUpdate>) {
        let id = ChannelId::new();
        let (tx, rx) = mpsc::channel(16);
        registry.register(id, tx);
        (id, rx)
    }

    #[tokio::test]
    async fn subscribe_joins_live_channels_after_persisting() {
        let h = harness();
        let (id, mut rx) = connect(&h.registry);
        h.registry.bind_user(id, "alice");

        h.service.subscribe("alice", "GOOG").await.unwrap();

        assert_eq!(h.broadcaster.member_count("GOOG"), 1);
        h.broadcaster.publish(&h.engine.tick());
        assert_eq!(rx.try_recv().unwrap().symbol, "GOOG");
    }

    #[tokio::test]
    async fn persistence_failure_leaves_mirror_untouched() {
        let h = harness();
        let (id, mut rx) = connect(&h.registry);
        h.registry.bind_user(id, "alice");
        h.store.set_fail_writes(true);

        let err = h.service.subscribe("alice", "GOOG").await.unwrap_err();
        assert!(matches!(err, LedgerError::Persistence(_)));

        assert_eq!(h.broadcaster.member_count("GOOG"), 0);
        h.broadcaster.publish(&h.engine.tick());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_symbol_touches_nothing() {
        let h = harness();
        let (id, _rx) = connect(&h.registry);
        h.registry.bind_user(id, "alice");

        let err = h.service.subscribe("alice", "AAPL").await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownSymbol(_)));
        assert_eq!(h.broadcaster.total_members(), 0);
        assert!(h.service.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_leaves_live_channels() {
        let h = harness();
        let (id, _rx) = connect(&h.registry);
        h.registry.bind_user(id, "alice");

        h.service.subscribe("alice", "GOOG").await.unwrap();
        h.service.unsubscribe("alice", "GOOG").await.unwrap();

        assert_eq!(h.broadcaster.member_count("GOOG"), 0);
        assert!(h.service.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_replays_exactly_the_durable_record() {
        let h = harness();

        h.service.subscribe("alice", "GOOG").await.unwrap();
        h.service.subscribe("alice", "TSLA").await.unwrap();

        // First session: an extra ephemeral join that must not survive.
        let (first, _first_rx) = connect(&h.registry);
        h.service.reconcile(first, "alice").await.unwrap();
        h.broadcaster.join(first, "NVDA");
        h.broadcaster.disconnect(first);
        assert_eq!(h.broadcaster.total_members(), 0);

        // Reconnect: only the ledger symbols come back.
        let (second, mut rx) = connect(&h.registry);
        let joined = h.service.reconcile(second, "alice").await.unwrap();
        assert_eq!(joined, 2);
        assert_eq!(h.broadcaster.member_count("GOOG"), 1);
        assert_eq!(h.broadcaster.member_count("TSLA"), 1);
        assert_eq!(h.broadcaster.member_count("NVDA"), 0);

        h.broadcaster.publish(&h.engine.tick());
        let mut symbols: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|u| u.symbol)
            .collect();
        symbols.sort();
        assert_eq!(symbols, vec!["GOOG", "TSLA"]);
    }

    #[tokio::test]
    async fn tick_driver_publishes_until_cancelled() {
        let h = harness();
        let (id, mut rx) = connect(&h.registry);
        h.broadcaster.join(id, "GOOG");

        let stats = Arc::new(HubStats::new());
        let cancel = CancellationToken::new();
        let driver = TickDriver::new(
            Arc::clone(&h.engine),
            Arc::clone(&h.broadcaster),
            Arc::clone(&stats),
            Duration::from_millis(10),
            cancel.clone(),
        );
        let handle = tokio::spawn(driver.run());

        let update = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.symbol, "GOOG");

        cancel.cancel();
        handle.await.unwrap();
        assert!(stats.tick_count() >= 1);
        assert!(stats.last_tick_age().is_some());
    }

    #[tokio::test]
    async fn staleness_monitor_synthesizes_then_yields_to_authority() {
        let config = ContinuityConfig {
            staleness_window: Duration::from_millis(50),
            check_interval: Duration::from_millis(20),
        };
        let controller = ContinuityController::with_seed(config, 9);
        let (updates_tx, updates_rx) = mpsc::channel(16);
        let (display_tx, mut display_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let monitor = StalenessMonitor::new(controller, updates_rx, display_tx, cancel.clone());
        let handle = tokio::spawn(monitor.run());

        let seed = PriceUpdate {
            symbol: "GOOG".to_string(),
            name: "Google".to_string(),
            price: 142.50,
            previous_price: 142.50,
            change: 0.0,
            change_percent: 0.0,
        };
        updates_tx.send(seed.clone()).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), display_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!first.synthetic);

        // Stall the feed long enough for synthesis to kick in.
        let synthetic = tokio::time::timeout(Duration::from_secs(2), display_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(synthetic.synthetic);
        assert_ne!(synthetic.update.price, seed.price);

        // An authoritative update wins outright.
        let fresh = PriceUpdate {
            price: 150.0,
            ..seed.clone()
        };
        updates_tx.send(fresh.clone()).await.unwrap();
        loop {
            let shown = tokio::time::timeout(Duration::from_secs(1), display_rx.recv())
                .await
                .unwrap()
                .unwrap();
            if !shown.synthetic {
                assert_eq!(shown.update, fresh);
                break;
            }
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}

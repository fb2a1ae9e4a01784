//! Topic Broadcast
//!
//! Per-symbol topic membership and tick fan-out, plus the live channel
//! registry (the in-memory mirror of who is connected and what they have
//! joined).
//!
//! # Architecture
//!
//! Every live connection registers a [`ChannelId`] with a bounded mpsc
//! sender; the transport adapter drains the receiving end into the
//! socket. Topics are created lazily per catalog symbol and hold only the
//! channels currently joined, so fan-out cost follows actual interest
//! rather than total connection count.
//!
//! # Concurrency
//!
//! Membership mutation and publish are mutually exclusive per topic and
//! independent across topics. `publish` copies each topic's member set
//! out of the lock and delivers with `try_send` outside any lock; a
//! closed or full channel is a routine per-channel delivery failure and
//! never affects other channels or the tick driver.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::catalog::{SharedCatalog, Symbol};
use crate::domain::ledger::UserId;
use crate::domain::pricing::{PriceSnapshot, PriceUpdate};
use crate::infrastructure::metrics;

// =============================================================================
// Channel identity
// =============================================================================

/// Identifier for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Mint a fresh channel identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Channel registry
// =============================================================================

#[derive(Debug)]
struct ChannelEntry {
    sender: mpsc::Sender<PriceUpdate>,
    user: Option<UserId>,
    joined: HashSet<Symbol>,
}

/// Live connection registry: transport handle, resolved identity, and the
/// joined-topic set per channel.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue.
    pub fn register(&self, id: ChannelId, sender: mpsc::Sender<PriceUpdate>) {
        let mut channels = self.channels.write();
        channels.insert(
            id,
            ChannelEntry {
                sender,
                user: None,
                joined: HashSet::new(),
            },
        );
        drop(channels);
        metrics::set_active_channels(self.len() as f64);
    }

    /// Remove a connection; returns the topics it had joined so the
    /// broadcaster can scrub its membership.
    pub fn deregister(&self, id: ChannelId) -> Option<HashSet<Symbol>> {
        let joined = self.channels.write().remove(&id).map(|e| e.joined);
        metrics::set_active_channels(self.len() as f64);
        joined
    }

    /// Bind a resolved user identity to a channel.
    pub fn bind_user(&self, id: ChannelId, user: &str) {
        if let Some(entry) = self.channels.write().get_mut(&id) {
            entry.user = Some(user.to_string());
        }
    }

    /// Channels currently bound to a user identity.
    #[must_use]
    pub fn channels_for_user(&self, user: &str) -> Vec<ChannelId> {
        self.channels
            .read()
            .iter()
            .filter(|(_, e)| e.user.as_deref() == Some(user))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Outbound queue for a channel, if it is still registered.
    #[must_use]
    pub fn sender(&self, id: ChannelId) -> Option<mpsc::Sender<PriceUpdate>> {
        self.channels.read().get(&id).map(|e| e.sender.clone())
    }

    /// Record a topic join on the channel's own set; false if the channel
    /// is not registered.
    fn note_join(&self, id: ChannelId, symbol: &str) -> bool {
        self.channels.write().get_mut(&id).is_some_and(|entry| {
            entry.joined.insert(symbol.to_string());
            true
        })
    }

    fn note_leave(&self, id: ChannelId, symbol: &str) {
        if let Some(entry) = self.channels.write().get_mut(&id) {
            entry.joined.remove(symbol);
        }
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Whether no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

/// Shared registry reference.
pub type SharedRegistry = Arc<ChannelRegistry>;

// =============================================================================
// Topic broadcaster
// =============================================================================

/// Outcome of one publish pass, for metrics and stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Updates handed to a channel queue.
    pub delivered: usize,
    /// Per-channel failures (closed or full queue).
    pub failed: usize,
}

/// Per-symbol topic membership and fan-out.
pub struct TopicBroadcaster {
    catalog: SharedCatalog,
    topics: RwLock<HashMap<Symbol, Arc<RwLock<HashSet<ChannelId>>>>>,
    registry: SharedRegistry,
}

impl TopicBroadcaster {
    /// Create a broadcaster over the catalog's topic space.
    #[must_use]
    pub fn new(catalog: SharedCatalog, registry: SharedRegistry) -> Self {
        Self {
            catalog,
            topics: RwLock::new(HashMap::new()),
            registry,
        }
    }

    /// Topic set for a symbol, created lazily. Topics are never
    /// destroyed - the topic space is bounded by the catalog.
    fn topic(&self, symbol: &str) -> Arc<RwLock<HashSet<ChannelId>>> {
        if let Some(existing) = self.topics.read().get(symbol) {
            return Arc::clone(existing);
        }
        let mut topics = self.topics.write();
        Arc::clone(
            topics
                .entry(symbol.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(HashSet::new()))),
        )
    }

    /// Join a channel to a symbol's topic.
    ///
    /// Idempotent, and silently a no-op for unknown symbols or
    /// unregistered channels - re-subscription on reconnect must not
    /// error.
    pub fn join(&self, channel: ChannelId, symbol: &str) {
        if !self.catalog.contains(symbol) {
            tracing::debug!(%channel, symbol, "join ignored for unknown symbol");
            return;
        }
        if !self.registry.note_join(channel, symbol) {
            tracing::debug!(%channel, symbol, "join ignored for unregistered channel");
            return;
        }
        self.topic(symbol).write().insert(channel);
        metrics::set_topic_members(self.total_members() as f64);
    }

    /// Remove a channel from a symbol's topic; no-op if absent.
    pub fn leave(&self, channel: ChannelId, symbol: &str) {
        self.registry.note_leave(channel, symbol);
        if let Some(topic) = self.topics.read().get(symbol) {
            topic.write().remove(&channel);
        }
        metrics::set_topic_members(self.total_members() as f64);
    }

    /// Tear down a channel: deregister it and scrub it from every topic
    /// it joined.
    ///
    /// Safe to run concurrently with an in-flight publish; a send to the
    /// torn-down channel fails as a routine delivery failure.
    pub fn disconnect(&self, channel: ChannelId) {
        let Some(joined) = self.registry.deregister(channel) else {
            return;
        };
        let topics = self.topics.read();
        for symbol in &joined {
            if let Some(topic) = topics.get(symbol) {
                topic.write().remove(&channel);
            }
        }
        drop(topics);
        metrics::set_topic_members(self.total_members() as f64);
        tracing::debug!(%channel, topics = joined.len(), "channel disconnected");
    }

    /// Fan one tick's snapshot out to the channels joined to each
    /// instrument's topic.
    ///
    /// Delivery is best-effort per channel; failures are counted and
    /// logged, never propagated.
    pub fn publish(&self, snapshot: &PriceSnapshot) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();

        for update in snapshot.iter() {
            let members: Vec<ChannelId> = {
                let topics = self.topics.read();
                match topics.get(&update.symbol) {
                    Some(topic) => topic.read().iter().copied().collect(),
                    None => continue,
                }
            };

            for channel in members {
                let Some(sender) = self.registry.sender(channel) else {
                    outcome.failed += 1;
                    continue;
                };
                match sender.try_send(update.clone()) {
                    Ok(()) => outcome.delivered += 1,
                    Err(err) => {
                        outcome.failed += 1;
                        tracing::debug!(
                            %channel,
                            symbol = %update.symbol,
                            error = %err,
                            "dropped update for channel"
                        );
                    }
                }
            }
        }

        metrics::record_published(snapshot.len() as u64);
        metrics::record_deliveries(outcome.delivered as u64);
        metrics::record_delivery_failures(outcome.failed as u64);
        outcome
    }

    /// Number of channels joined to a symbol's topic.
    #[must_use]
    pub fn member_count(&self, symbol: &str) -> usize {
        self.topics
            .read()
            .get(symbol)
            .map_or(0, |topic| topic.read().len())
    }

    /// Number of topics that have been touched so far.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Total memberships across all topics.
    #[must_use]
    pub fn total_members(&self) -> usize {
        self.topics
            .read()
            .values()
            .map(|topic| topic.read().len())
            .sum()
    }
}

/// Shared broadcaster reference.
pub type SharedBroadcaster = Arc<TopicBroadcaster>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::catalog::InstrumentCatalog;
    use crate::domain::pricing::{PriceEngine, PriceState};

    fn setup() -> (SharedBroadcaster, SharedRegistry, Arc<PriceEngine>) {
        let catalog = Arc::new(InstrumentCatalog::builtin());
        let registry = Arc::new(ChannelRegistry::new());
        let broadcaster = Arc::new(TopicBroadcaster::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
        ));
        let engine = Arc::new(PriceEngine::with_seed(catalog, 3));
        (broadcaster, registry, engine)
    }

    fn connect(registry: &ChannelRegistry) -> (ChannelId, mpsc::Receiver<PriceUpdate>) {
        let id = ChannelId::new();
        let (tx, rx) = mpsc::channel(16);
        registry.register(id, tx);
        (id, rx)
    }

    #[test]
    fn joined_channel_receives_only_its_topic() {
        let (broadcaster, registry, engine) = setup();
        let (id, mut rx) = connect(&registry);

        broadcaster.join(id, "GOOG");
        let snapshot = engine.tick();
        let outcome = broadcaster.publish(&snapshot);

        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failed, 0);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.symbol, "GOOG");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unjoined_channel_sees_no_traffic() {
        let (broadcaster, registry, engine) = setup();
        let (_id, mut rx) = connect(&registry);

        broadcaster.publish(&engine.tick());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn join_is_idempotent() {
        let (broadcaster, registry, engine) = setup();
        let (id, mut rx) = connect(&registry);

        broadcaster.join(id, "GOOG");
        broadcaster.join(id, "GOOG");
        assert_eq!(broadcaster.member_count("GOOG"), 1);

        broadcaster.publish(&engine.tick());
        assert!(rx.try_recv().is_ok());
        // One membership, one delivery.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_symbol_join_is_silent_noop() {
        let (broadcaster, registry, _engine) = setup();
        let (id, _rx) = connect(&registry);

        broadcaster.join(id, "AAPL");
        assert_eq!(broadcaster.member_count("AAPL"), 0);
        assert_eq!(broadcaster.topic_count(), 0);
    }

    #[test]
    fn unregistered_channel_join_is_silent_noop() {
        let (broadcaster, _registry, _engine) = setup();
        broadcaster.join(ChannelId::new(), "GOOG");
        assert_eq!(broadcaster.member_count("GOOG"), 0);
    }

    #[test]
    fn leave_stops_delivery() {
        let (broadcaster, registry, engine) = setup();
        let (id, mut rx) = connect(&registry);

        broadcaster.join(id, "GOOG");
        broadcaster.leave(id, "GOOG");
        // Leaving twice is fine.
        broadcaster.leave(id, "GOOG");

        broadcaster.publish(&engine.tick());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_scrubs_every_topic() {
        let (broadcaster, registry, engine) = setup();
        let (id, rx) = connect(&registry);

        broadcaster.join(id, "GOOG");
        broadcaster.join(id, "TSLA");
        assert_eq!(broadcaster.total_members(), 2);

        drop(rx);
        broadcaster.disconnect(id);

        assert_eq!(broadcaster.total_members(), 0);
        assert!(registry.is_empty());

        let outcome = broadcaster.publish(&engine.tick());
        assert_eq!(outcome.delivered, 0);
        assert_eq!(outcome.failed, 0);
    }

    #[test]
    fn closed_receiver_is_counted_not_fatal() {
        let (broadcaster, registry, engine) = setup();
        let (dead, dead_rx) = connect(&registry);
        let (live, mut live_rx) = connect(&registry);

        broadcaster.join(dead, "GOOG");
        broadcaster.join(live, "GOOG");
        drop(dead_rx);

        let outcome = broadcaster.publish(&engine.tick());
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(live_rx.try_recv().unwrap().symbol, "GOOG");
    }

    #[test]
    fn full_queue_is_counted_not_fatal() {
        let catalog = Arc::new(InstrumentCatalog::builtin());
        let registry = Arc::new(ChannelRegistry::new());
        let broadcaster =
            TopicBroadcaster::new(Arc::clone(&catalog), Arc::clone(&registry));
        let engine = PriceEngine::with_seed(catalog, 3);

        let id = ChannelId::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.register(id, tx);
        broadcaster.join(id, "GOOG");
        broadcaster.join(id, "TSLA");

        // Capacity one: the second update cannot be queued.
        let outcome = broadcaster.publish(&engine.tick());
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failed, 1);
    }

    #[test]
    fn topics_are_independent() {
        let (broadcaster, registry, engine) = setup();
        let (goog, mut goog_rx) = connect(&registry);
        let (tsla, mut tsla_rx) = connect(&registry);

        broadcaster.join(goog, "GOOG");
        broadcaster.join(tsla, "TSLA");
        broadcaster.publish(&engine.tick());

        assert_eq!(goog_rx.try_recv().unwrap().symbol, "GOOG");
        assert!(goog_rx.try_recv().is_err());
        assert_eq!(tsla_rx.try_recv().unwrap().symbol, "TSLA");
        assert!(tsla_rx.try_recv().is_err());
    }

    #[test]
    fn registry_tracks_user_bindings() {
        let registry = ChannelRegistry::new();
        let (a_tx, _a_rx) = mpsc::channel(1);
        let (b_tx, _b_rx) = mpsc::channel(1);
        let a = ChannelId::new();
        let b = ChannelId::new();
        registry.register(a, a_tx);
        registry.register(b, b_tx);

        registry.bind_user(a, "alice");
        registry.bind_user(b, "alice");

        let mut channels = registry.channels_for_user("alice");
        channels.sort_by_key(ToString::to_string);
        let mut expected = vec![a, b];
        expected.sort_by_key(ToString::to_string);
        assert_eq!(channels, expected);
        assert!(registry.channels_for_user("bob").is_empty());
    }

    #[test]
    fn publish_with_static_state() {
        // A hand-built snapshot delivers the exact payload it was given.
        let (broadcaster, registry, _engine) = setup();
        let (id, mut rx) = connect(&registry);
        broadcaster.join(id, "GOOG");

        let snapshot: PriceSnapshot = Arc::new(vec![PriceUpdate::from_state(
            "GOOG",
            "Google",
            PriceState::seeded(142.50),
        )]);
        broadcaster.publish(&snapshot);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.price, 142.50);
        assert_eq!(received.name, "Google");
    }
}

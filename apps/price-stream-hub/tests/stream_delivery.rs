//! Stream Delivery Integration Tests
//!
//! Runs the hub over a real socket and checks topic-scoped delivery,
//! durable replay on reconnect, and disconnect cleanup. Ticks are driven
//! by hand so assertions never race the timer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use price_stream_hub::{
    AppState, ChannelRegistry, InMemorySubscriptionStore, InstrumentCatalog, OpaqueTokenIdentity,
    PriceEngine, PriceUpdate, SharedBroadcaster, SubscriptionLedger, SubscriptionService,
    SubscriptionStore, TopicBroadcaster, router,
};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    addr: std::net::SocketAddr,
    engine: Arc<PriceEngine>,
    broadcaster: SharedBroadcaster,
    subscriptions: Arc<SubscriptionService>,
    server: tokio::task::JoinHandle<()>,
}

async fn start_hub() -> TestHub {
    let catalog = Arc::new(InstrumentCatalog::builtin());
    let engine = Arc::new(PriceEngine::with_seed(Arc::clone(&catalog), 7));
    let registry = Arc::new(ChannelRegistry::new());
    let broadcaster = Arc::new(TopicBroadcaster::new(
        Arc::clone(&catalog),
        Arc::clone(&registry),
    ));
    let store = Arc::new(InMemorySubscriptionStore::new());
    let ledger = Arc::new(SubscriptionLedger::new(
        Arc::clone(&catalog),
        store as Arc<dyn SubscriptionStore>,
    ));
    let subscriptions = Arc::new(SubscriptionService::new(
        ledger,
        Arc::clone(&broadcaster),
        Arc::clone(&registry),
    ));

    let state = AppState {
        catalog,
        engine: Arc::clone(&engine),
        subscriptions: Arc::clone(&subscriptions),
        broadcaster: Arc::clone(&broadcaster),
        registry,
        identity: Arc::new(OpaqueTokenIdentity::new()),
        queue_capacity: 64,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state);
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestHub {
        addr,
        engine,
        broadcaster,
        subscriptions,
        server,
    }
}

async fn connect_ws(hub: &TestHub) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}/ws", hub.addr)).await.unwrap();
    ws
}

async fn send_frame(ws: &mut WsClient, frame: serde_json::Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Wait until a topic reaches the expected membership; frames are
/// processed asynchronously on the server side.
async fn wait_for_members(hub: &TestHub, symbol: &str, expected: usize) {
    for _ in 0..100 {
        if hub.broadcaster.member_count(symbol) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "topic {symbol} never reached {expected} members (have {})",
        hub.broadcaster.member_count(symbol)
    );
}

async fn next_update(ws: &mut WsClient) -> PriceUpdate {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for update")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

// =============================================================================
// Topic-scoped delivery
// =============================================================================

#[tokio::test]
async fn ephemeral_join_receives_only_its_topic() {
    let hub = start_hub().await;
    let mut ws = connect_ws(&hub).await;

    send_frame(&mut ws, serde_json::json!({"action": "subscribe", "symbol": "GOOG"})).await;
    wait_for_members(&hub, "GOOG", 1).await;

    // Two ticks: every received frame must be GOOG.
    hub.broadcaster.publish(&hub.engine.tick());
    hub.broadcaster.publish(&hub.engine.tick());

    let first = next_update(&mut ws).await;
    let second = next_update(&mut ws).await;
    assert_eq!(first.symbol, "GOOG");
    assert_eq!(second.symbol, "GOOG");
    assert!((second.previous_price - first.price).abs() < f64::EPSILON);

    hub.server.abort();
}

#[tokio::test]
async fn leave_stops_the_stream() {
    let hub = start_hub().await;
    let mut ws = connect_ws(&hub).await;

    send_frame(&mut ws, serde_json::json!({"action": "subscribe", "symbol": "GOOG"})).await;
    wait_for_members(&hub, "GOOG", 1).await;

    hub.broadcaster.publish(&hub.engine.tick());
    assert_eq!(next_update(&mut ws).await.symbol, "GOOG");

    send_frame(&mut ws, serde_json::json!({"action": "unsubscribe", "symbol": "GOOG"})).await;
    wait_for_members(&hub, "GOOG", 0).await;

    hub.broadcaster.publish(&hub.engine.tick());
    let silent = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(silent.is_err(), "received traffic after leaving the topic");

    hub.server.abort();
}

#[tokio::test]
async fn unknown_symbol_join_is_ignored() {
    let hub = start_hub().await;
    let mut ws = connect_ws(&hub).await;

    send_frame(&mut ws, serde_json::json!({"action": "subscribe", "symbol": "AAPL"})).await;
    // Give the frame time to land; no topic should appear.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.broadcaster.member_count("AAPL"), 0);

    hub.broadcaster.publish(&hub.engine.tick());
    let silent = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(silent.is_err());

    hub.server.abort();
}

// =============================================================================
// Durable replay on reconnect
// =============================================================================

#[tokio::test]
async fn identify_replays_durable_record() {
    let hub = start_hub().await;

    hub.subscriptions.subscribe("alice", "TSLA").await.unwrap();
    hub.subscriptions.subscribe("alice", "NVDA").await.unwrap();

    let mut ws = connect_ws(&hub).await;
    send_frame(&mut ws, serde_json::json!({"action": "identify", "token": "alice"})).await;
    wait_for_members(&hub, "TSLA", 1).await;
    wait_for_members(&hub, "NVDA", 1).await;

    hub.broadcaster.publish(&hub.engine.tick());
    let mut symbols = vec![next_update(&mut ws).await.symbol, next_update(&mut ws).await.symbol];
    symbols.sort();
    assert_eq!(symbols, vec!["NVDA", "TSLA"]);

    hub.server.abort();
}

#[tokio::test]
async fn reconnect_restores_exactly_the_durable_set() {
    let hub = start_hub().await;
    hub.subscriptions.subscribe("alice", "TSLA").await.unwrap();

    // First session: identify plus an extra ephemeral join.
    let mut first = connect_ws(&hub).await;
    send_frame(&mut first, serde_json::json!({"action": "identify", "token": "alice"})).await;
    send_frame(&mut first, serde_json::json!({"action": "subscribe", "symbol": "GOOG"})).await;
    wait_for_members(&hub, "TSLA", 1).await;
    wait_for_members(&hub, "GOOG", 1).await;

    // Disconnect; all live membership for the channel must vanish.
    first.close(None).await.unwrap();
    wait_for_members(&hub, "TSLA", 0).await;
    wait_for_members(&hub, "GOOG", 0).await;

    // Reconnect: only the durable record comes back.
    let mut second = connect_ws(&hub).await;
    send_frame(&mut second, serde_json::json!({"action": "identify", "token": "alice"})).await;
    wait_for_members(&hub, "TSLA", 1).await;
    assert_eq!(hub.broadcaster.member_count("GOOG"), 0);

    hub.broadcaster.publish(&hub.engine.tick());
    assert_eq!(next_update(&mut second).await.symbol, "TSLA");

    hub.server.abort();
}

// =============================================================================
// Durable subscribe reaches live channels
// =============================================================================

#[tokio::test]
async fn rest_subscribe_joins_an_identified_channel() {
    let hub = start_hub().await;

    let mut ws = connect_ws(&hub).await;
    // A malformed frame is ignored without killing the connection.
    ws.send(Message::Text("not json".into())).await.unwrap();
    send_frame(&mut ws, serde_json::json!({"action": "identify", "token": "alice"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Durable subscribe while connected: ledger first, then the live join.
    hub.subscriptions.subscribe("alice", "META").await.unwrap();
    wait_for_members(&hub, "META", 1).await;

    hub.broadcaster.publish(&hub.engine.tick());
    assert_eq!(next_update(&mut ws).await.symbol, "META");

    hub.server.abort();
}

// =============================================================================
// Disconnect cleanup vs in-flight publish
// =============================================================================

#[tokio::test]
async fn publish_concurrent_with_disconnect_is_nonfatal() {
    let hub = start_hub().await;
    let mut ws = connect_ws(&hub).await;

    send_frame(&mut ws, serde_json::json!({"action": "subscribe", "symbol": "GOOG"})).await;
    wait_for_members(&hub, "GOOG", 1).await;

    // Tear the connection down while a publish loop hammers the topic.
    let broadcaster = Arc::clone(&hub.broadcaster);
    let engine = Arc::clone(&hub.engine);
    let publisher = tokio::spawn(async move {
        for _ in 0..50 {
            broadcaster.publish(&engine.tick());
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    drop(ws);
    publisher.await.unwrap();

    wait_for_members(&hub, "GOOG", 0).await;
    let outcome = hub.broadcaster.publish(&hub.engine.tick());
    assert_eq!(outcome.delivered, 0);
    assert_eq!(outcome.failed, 0);

    hub.server.abort();
}

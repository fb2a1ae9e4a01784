//! WebSocket Transport Adapter
//!
//! One channel per connection. The outbound side drains the channel's
//! bounded queue into the socket; the inbound side handles the small
//! client protocol:
//!
//! - `{"action":"identify","token":"..."}` - resolve identity and replay
//!   the durable record onto this channel (reconcile)
//! - `{"action":"subscribe","symbol":"..."}` - ephemeral topic join,
//!   accepted unconditionally and gone on disconnect
//! - `{"action":"unsubscribe","symbol":"..."}` - topic leave
//!
//! Ephemeral joins are a deliberately lighter-weight tier than durable
//! subscriptions: they are never written to the ledger and are not
//! replayed on reconnect.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::AppState;
use crate::infrastructure::broadcast::ChannelId;

/// Client-to-hub frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientFrame {
    /// Present a credential and replay the durable record.
    Identify {
        /// Opaque credential.
        token: String,
    },
    /// Ephemeral join.
    Subscribe {
        /// Topic symbol.
        symbol: String,
    },
    /// Leave a topic.
    Unsubscribe {
        /// Topic symbol.
        symbol: String,
    },
}

/// WebSocket upgrade handler: `GET /ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Drive one connection until either side closes.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let channel = ChannelId::new();
    let (tx, mut rx) = mpsc::channel(state.queue_capacity);
    state.registry.register(channel, tx);
    tracing::debug!(%channel, "websocket connected");

    let (mut sink, mut stream) = socket.split();

    // Outbound: drain the channel queue into the socket.
    let send_task = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match serde_json::to_string(&update) {
                Ok(json) => {
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize update");
                }
            }
        }
    });

    // Inbound: handle client frames until close or error.
    let recv_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => handle_frame(&recv_state, channel, frame).await,
                        Err(_) => {
                            tracing::debug!(%channel, frame = %text, "ignoring malformed frame");
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::debug!(%channel, error = %e, "websocket receive error");
                    break;
                }
                _ => {} // Ignore ping/pong/binary.
            }
        }
    });

    // Either side finishing tears the connection down.
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.broadcaster.disconnect(channel);
    tracing::debug!(%channel, "websocket disconnected");
}

async fn handle_frame(state: &AppState, channel: ChannelId, frame: ClientFrame) {
    match frame {
        ClientFrame::Identify { token } => match state.identity.resolve(&token).await {
            Ok(user) => {
                if let Err(e) = state.subscriptions.reconcile(channel, &user).await {
                    tracing::warn!(%channel, user, error = %e, "reconcile failed");
                }
            }
            Err(e) => {
                tracing::debug!(%channel, error = %e, "identify rejected");
            }
        },
        ClientFrame::Subscribe { symbol } => {
            state.broadcaster.join(channel, &symbol);
        }
        ClientFrame::Unsubscribe { symbol } => {
            state.broadcaster.leave(channel, &symbol);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

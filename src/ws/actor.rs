use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::auth::ActorKind;
use crate::membership::channels_for_actor;
use crate::presence;
use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::rooms::ActorKey;
use crate::ws::ConnectionSender;

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code sent to a connection replaced by a newer one for the same actor.
const CLOSE_SUPERSEDED: u16 = 4000;

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming messages, dispatches to protocol handlers
///
/// Connect handling runs to completion (registration, channel subscriptions,
/// presence broadcast) before the first incoming message is processed, and
/// disconnect cleanup is the terminal step, so presence transitions for one
/// actor are ordered within a connection epoch.
pub async fn run_connection(socket: WebSocket, state: AppState, kind: ActorKind, actor_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let actor_key: ActorKey = (kind, actor_id.clone());

    // Register in the connection registry. Last-connected-wins: a replaced
    // connection is told to close; its own cleanup is guarded below.
    if let Some(replaced) = state.registry.register(kind, &actor_id, tx.clone()) {
        tracing::debug!(actor_id = %actor_id, "Replacing prior connection for actor");
        let _ = replaced.send(Message::Close(Some(CloseFrame {
            code: CLOSE_SUPERSEDED,
            reason: "Superseded by newer connection".into(),
        })));
    }

    // Subscribe to every channel this actor currently belongs to:
    // conversations for users, the admin room for admins.
    for channel in channels_for_actor(&state.db, kind, &actor_id).await {
        state.rooms.subscribe(&channel, &actor_key);
    }

    // Persist online state and broadcast presenceUpdate + onlineUsers
    presence::mark_online(&state, kind, &actor_id).await;

    tracing::info!(
        actor_id = %actor_id,
        kind = kind.as_str(),
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            // Send ping
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            // Wait for pong within timeout
            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    // Pong timeout or channel closed — close connection
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages in receipt order
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(&text, &tx, &state, kind, &actor_id).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        actor_id = %actor_id,
                        "Received binary frame (protocol is JSON text)"
                    );
                }
                Message::Pong(_) => {
                    // Pong received — notify the ping task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        actor_id = %actor_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    actor_id = %actor_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(actor_id = %actor_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Only this connection's own registry entry may be removed. When a
    // newer connection has replaced it, presence and room state now belong
    // to that connection and must be left untouched.
    let removed = state.registry.unregister(kind, &actor_id, &tx);
    if removed {
        state.rooms.unsubscribe_all(&actor_key);
        presence::mark_offline(&state, kind, &actor_id).await;
    } else {
        tracing::debug!(
            actor_id = %actor_id,
            "Connection was superseded, skipping presence cleanup"
        );
    }

    tracing::info!(
        actor_id = %actor_id,
        kind = kind.as_str(),
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}

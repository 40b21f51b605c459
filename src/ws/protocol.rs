//! Dispatch for incoming client commands on the WebSocket channel.
//!
//! Decodes the JSON envelope and routes to the same service functions the
//! REST handlers use, so the persist-then-relay semantics are transport
//! independent. Rejections come back as `error` events on the sender's own
//! connection.

use axum::http::StatusCode;
use tokio::sync::mpsc;

use crate::auth::ActorKind;
use crate::dm::messages;
use crate::state::AppState;
use crate::ws::events::{ClientCommand, SendMessagePayload, ServerEvent};

/// Handle one incoming text frame from an authenticated connection.
pub async fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<axum::extract::ws::Message>,
    state: &AppState,
    kind: ActorKind,
    actor_id: &str,
) {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::debug!(
                actor_id = %actor_id,
                error = %e,
                "Failed to decode client command"
            );
            send_error(tx, 400, "Invalid command envelope");
            return;
        }
    };

    // Messaging commands are user-scoped; admin connections only consume
    // the admin room and presence streams.
    if kind != ActorKind::User {
        send_error(tx, 403, "Command not available for this actor kind");
        return;
    }

    let result = match command {
        ClientCommand::SendMessage(payload) => send_message(state, actor_id, payload).await,
        ClientCommand::EditMessage(payload) => {
            messages::edit_and_relay(state, actor_id, &payload.message_id, &payload.content).await
        }
        ClientCommand::DeleteMessage(payload) => {
            messages::delete_and_relay(state, actor_id, &payload.message_id).await
        }
        ClientCommand::Typing(payload) => {
            messages::typing_relay(state, actor_id, &payload.conversation_id, false).await
        }
        ClientCommand::StopTyping(payload) => {
            messages::typing_relay(state, actor_id, &payload.conversation_id, true).await
        }
    };

    if let Err(status) = result {
        send_error(
            tx,
            status.as_u16(),
            status.canonical_reason().unwrap_or("Request rejected"),
        );
    }
}

async fn send_message(
    state: &AppState,
    actor_id: &str,
    payload: SendMessagePayload,
) -> Result<(), StatusCode> {
    let input = messages::SendMessageInput {
        receiver_id: payload.receiver_id,
        conversation_id: payload.conversation_id,
        content: payload.content,
        attachment: payload.attachment,
    };
    messages::send_and_relay(state, actor_id, input).await?;
    Ok(())
}

/// Send an error event back on the offending connection.
fn send_error(
    tx: &mpsc::UnboundedSender<axum::extract::ws::Message>,
    code: u16,
    message: &str,
) {
    let event = ServerEvent::Error {
        code,
        message: message.to_string(),
    };
    let _ = tx.send(event.to_message());
}

//! Message send/edit/delete, read receipts, typing, and history.
//!
//! All operations are exposed both as REST handlers and to the WebSocket
//! dispatcher through the shared `*_and_relay` service functions, so the
//! persist-then-relay path is identical regardless of transport.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::auth::ActorKind;
use crate::dm::conversations::{require_participant, resolve_or_create_direct};
use crate::dm::MessageView;
use crate::membership::subscribe_if_connected;
use crate::state::AppState;
use crate::ws::broadcast::{send_to_actor, send_to_room};
use crate::ws::events::ServerEvent;
use crate::ws::rooms::conversation_room;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageInput {
    pub receiver_id: Option<String>,
    pub conversation_id: Option<String>,
    pub content: String,
    pub attachment: Option<String>,
}

struct SendOutcome {
    view: MessageView,
    /// Direct conversation created by this send; both participants' live
    /// connections need subscribing before the relay.
    created_with: Option<String>,
}

/// Persist a message and relay it to every participant (sender included,
/// for multi-tab consistency). If no valid conversation can be resolved,
/// the operation is rejected and nothing is persisted.
pub async fn send_and_relay(
    state: &AppState,
    sender_id: &str,
    input: SendMessageInput,
) -> Result<MessageView, StatusCode> {
    if input.content.is_empty() && input.attachment.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let sender = sender_id.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Resolve the target conversation before touching anything.
        let (conversation_id, created_with, receiver_id) = match (&input.conversation_id, &input.receiver_id) {
            (Some(conv_id), _) => {
                require_participant(&conn, conv_id, &sender)?;
                (conv_id.clone(), None, None)
            }
            (None, Some(receiver_id)) => {
                if *receiver_id == sender {
                    return Err(StatusCode::BAD_REQUEST);
                }
                let receiver_exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM users WHERE id = ?1",
                        rusqlite::params![receiver_id],
                        |_| Ok(true),
                    )
                    .unwrap_or(false);
                if !receiver_exists {
                    return Err(StatusCode::NOT_FOUND);
                }

                let tx = conn
                    .transaction()
                    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                let resolved = resolve_or_create_direct(&tx, &sender, receiver_id)
                    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
                tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

                let created_with = resolved.created.then(|| receiver_id.clone());
                (resolved.id, created_with, Some(receiver_id.clone()))
            }
            (None, None) => return Err(StatusCode::BAD_REQUEST),
        };

        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, attachment, read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            rusqlite::params![
                id,
                conversation_id,
                sender,
                receiver_id,
                input.content,
                input.attachment,
                created_at
            ],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "UPDATE conversations SET last_message_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![id, created_at, conversation_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let sender_name: String = conn
            .query_row(
                "SELECT display_name FROM users WHERE id = ?1",
                rusqlite::params![sender],
                |row| row.get(0),
            )
            .unwrap_or_else(|_| "Unknown".to_string());

        Ok::<_, StatusCode>(SendOutcome {
            view: MessageView {
                id,
                conversation_id,
                sender_id: sender,
                receiver_id,
                content: input.content,
                attachment: input.attachment,
                read: false,
                created_at,
                sender_name,
            },
            created_with,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    // A first-message conversation did not exist when either participant
    // connected; attach their live connections to its channel now.
    if let Some(receiver_id) = &outcome.created_with {
        subscribe_if_connected(state, &outcome.view.sender_id, &outcome.view.conversation_id);
        subscribe_if_connected(state, receiver_id, &outcome.view.conversation_id);
    }

    send_to_room(
        &state.registry,
        &state.rooms,
        &conversation_room(&outcome.view.conversation_id),
        &ServerEvent::ReceiveMessage(outcome.view.clone()),
        None,
    );

    Ok(outcome.view)
}

/// Edit a message's content. Sender only; no edit history retained.
pub async fn edit_and_relay(
    state: &AppState,
    actor_id: &str,
    message_id: &str,
    content: &str,
) -> Result<(), StatusCode> {
    if content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let actor = actor_id.to_string();
    let msg_id = message_id.to_string();
    let new_content = content.to_string();

    let conversation_id = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let (sender_id, conversation_id): (String, String) = conn
            .query_row(
                "SELECT sender_id, conversation_id FROM messages WHERE id = ?1",
                rusqlite::params![msg_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| StatusCode::NOT_FOUND)?;

        if sender_id != actor {
            return Err(StatusCode::FORBIDDEN);
        }

        conn.execute(
            "UPDATE messages SET content = ?1 WHERE id = ?2",
            rusqlite::params![new_content, msg_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<String, StatusCode>(conversation_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    send_to_room(
        &state.registry,
        &state.rooms,
        &conversation_room(&conversation_id),
        &ServerEvent::MessageEdited {
            message_id: message_id.to_string(),
            conversation_id,
            content: content.to_string(),
        },
        None,
    );

    Ok(())
}

/// Remove a message entirely. Sender only. If it was the conversation's
/// last-message pointer, the pointer is cleared.
pub async fn delete_and_relay(
    state: &AppState,
    actor_id: &str,
    message_id: &str,
) -> Result<(), StatusCode> {
    let db = state.db.clone();
    let actor = actor_id.to_string();
    let msg_id = message_id.to_string();

    let conversation_id = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let (sender_id, conversation_id): (String, String) = conn
            .query_row(
                "SELECT sender_id, conversation_id FROM messages WHERE id = ?1",
                rusqlite::params![msg_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| StatusCode::NOT_FOUND)?;

        if sender_id != actor {
            return Err(StatusCode::FORBIDDEN);
        }

        let tx = conn
            .transaction()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "UPDATE conversations SET last_message_id = NULL WHERE id = ?1 AND last_message_id = ?2",
            rusqlite::params![conversation_id, msg_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "DELETE FROM messages WHERE id = ?1",
            rusqlite::params![msg_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<String, StatusCode>(conversation_id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    send_to_room(
        &state.registry,
        &state.rooms,
        &conversation_room(&conversation_id),
        &ServerEvent::MessageDeleted {
            message_id: message_id.to_string(),
            conversation_id,
        },
        None,
    );

    Ok(())
}

/// Per-viewer clear: hide every message of the conversation from the
/// requesting actor without affecting other participants. Relayed only to
/// the requester's own connection.
pub async fn clear_conversation(
    state: &AppState,
    actor_id: &str,
    conversation_id: &str,
) -> Result<(), StatusCode> {
    let db = state.db.clone();
    let actor = actor_id.to_string();
    let conv_id = conversation_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        require_participant(&conn, &conv_id, &actor)?;

        conn.execute(
            "INSERT OR IGNORE INTO message_deleted_by (message_id, user_id)
             SELECT id, ?1 FROM messages WHERE conversation_id = ?2",
            rusqlite::params![actor, conv_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<(), StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    send_to_actor(
        &state.registry,
        ActorKind::User,
        actor_id,
        &ServerEvent::ConversationCleared {
            conversation_id: conversation_id.to_string(),
        },
    );

    Ok(())
}

/// Read receipts: mark every message in the conversation not sent by the
/// actor and not already read by them, then tell the other participants.
/// Idempotent.
pub async fn mark_read_and_relay(
    state: &AppState,
    actor_id: &str,
    conversation_id: &str,
) -> Result<(), StatusCode> {
    let db = state.db.clone();
    let actor = actor_id.to_string();
    let conv_id = conversation_id.to_string();

    tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        require_participant(&conn, &conv_id, &actor)?;

        let tx = conn
            .transaction()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "INSERT OR IGNORE INTO message_read_by (message_id, user_id)
             SELECT id, ?1 FROM messages WHERE conversation_id = ?2 AND sender_id != ?1",
            rusqlite::params![actor, conv_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "UPDATE messages SET read = 1
             WHERE conversation_id = ?1 AND sender_id != ?2 AND read = 0",
            rusqlite::params![conv_id, actor],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<(), StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let reader_key = (ActorKind::User, actor_id.to_string());
    send_to_room(
        &state.registry,
        &state.rooms,
        &conversation_room(conversation_id),
        &ServerEvent::MessagesRead {
            conversation_id: conversation_id.to_string(),
            reader_id: actor_id.to_string(),
        },
        Some(&reader_key),
    );

    Ok(())
}

/// Typing indicators: ephemeral, never persisted, relayed to the other
/// participants only. Debouncing is the client's concern.
pub async fn typing_relay(
    state: &AppState,
    actor_id: &str,
    conversation_id: &str,
    stopped: bool,
) -> Result<(), StatusCode> {
    let room = conversation_room(conversation_id);
    let key = (ActorKind::User, actor_id.to_string());
    if !state.rooms.is_member(&room, &key) {
        return Err(StatusCode::FORBIDDEN);
    }

    let event = if stopped {
        ServerEvent::UserStopTyping {
            conversation_id: conversation_id.to_string(),
            user_id: actor_id.to_string(),
        }
    } else {
        let db = state.db.clone();
        let actor = actor_id.to_string();
        let user_name = tokio::task::spawn_blocking(move || {
            let conn = db.lock().ok()?;
            conn.query_row(
                "SELECT display_name FROM users WHERE id = ?1",
                rusqlite::params![actor],
                |row| row.get::<_, String>(0),
            )
            .ok()
        })
        .await
        .ok()
        .flatten();

        ServerEvent::UserTyping {
            conversation_id: conversation_id.to_string(),
            user_id: actor_id.to_string(),
            user_name,
        }
    };

    send_to_room(&state.registry, &state.rooms, &room, &event, Some(&key));
    Ok(())
}

// --- REST handlers (same relay path as the WS dispatcher) ---

/// POST /api/messages
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageInput>,
) -> Result<(StatusCode, Json<MessageView>), StatusCode> {
    let view = send_and_relay(&state, &claims.sub, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
pub struct EditMessageBody {
    pub content: String,
}

/// PUT /api/messages/{id}
pub async fn edit_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<EditMessageBody>,
) -> Result<StatusCode, StatusCode> {
    edit_and_relay(&state, &claims.sub, &message_id, &body.content).await?;
    Ok(StatusCode::OK)
}

/// DELETE /api/messages/{id}
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    delete_and_relay(&state, &claims.sub, &message_id).await?;
    Ok(StatusCode::OK)
}

/// PUT /api/conversations/{id}/read
pub async fn mark_conversation_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    mark_read_and_relay(&state, &claims.sub, &conversation_id).await?;
    Ok(StatusCode::OK)
}

/// DELETE /api/conversations/{id}/messages — per-viewer clear.
pub async fn clear_conversation_handler(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    clear_conversation(&state, &claims.sub, &conversation_id).await?;
    Ok(StatusCode::OK)
}

/// GET /api/conversations/{id}/messages — History for the viewer, oldest
/// first, excluding messages the viewer has cleared.
pub async fn list_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<MessageView>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let result = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        require_participant(&conn, &conversation_id, &user_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.conversation_id, m.sender_id, m.receiver_id, m.content,
                        m.attachment, m.read, m.created_at, u.display_name
                 FROM messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.conversation_id = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM message_deleted_by d
                       WHERE d.message_id = m.id AND d.user_id = ?2
                   )
                 ORDER BY m.created_at ASC, m.id ASC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let messages: Vec<MessageView> = stmt
            .query_map(rusqlite::params![conversation_id, user_id], |row| {
                Ok(MessageView {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    receiver_id: row.get(3)?,
                    content: row.get(4)?,
                    attachment: row.get(5)?,
                    read: row.get::<_, i64>(6)? != 0,
                    created_at: row.get(7)?,
                    sender_name: row
                        .get::<_, Option<String>>(8)?
                        .unwrap_or_else(|| "Unknown".to_string()),
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>(messages)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(result))
}

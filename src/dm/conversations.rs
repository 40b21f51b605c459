//! Conversation resolution and listing.
//!
//! Direct conversations are unique per unordered participant pair: the pair
//! is normalized (smaller id is participant_a) and looked up or created on
//! first message. Group conversations mirror group membership and are
//! managed by the groups module.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::dm::{ConversationView, LastMessagePreview};
use crate::state::AppState;

/// Outcome of resolving a direct conversation.
pub struct ResolvedConversation {
    pub id: String,
    pub created: bool,
}

/// Look up or create the direct conversation between two users, inside the
/// caller's transaction scope. The receiver must already be validated.
pub fn resolve_or_create_direct(
    conn: &Connection,
    sender_id: &str,
    receiver_id: &str,
) -> Result<ResolvedConversation, rusqlite::Error> {
    // Normalize the pair so the unique index covers both orderings
    let (a, b) = if sender_id < receiver_id {
        (sender_id, receiver_id)
    } else {
        (receiver_id, sender_id)
    };

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM conversations WHERE participant_a = ?1 AND participant_b = ?2",
            rusqlite::params![a, b],
            |row| row.get(0),
        )
        .ok();

    if let Some(id) = existing {
        return Ok(ResolvedConversation { id, created: false });
    }

    let id = Uuid::now_v7().to_string();
    // Timestamps are written explicitly: updated_at string-orders the
    // conversation listing, so every writer must use the same RFC3339
    // format that message sends stamp.
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO conversations (id, is_group, participant_a, participant_b, created_at, updated_at)
         VALUES (?1, 0, ?2, ?3, ?4, ?4)",
        rusqlite::params![id, a, b, now],
    )?;
    for participant in [a, b] {
        conn.execute(
            "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![id, participant],
        )?;
    }

    Ok(ResolvedConversation { id, created: true })
}

/// Verify the actor participates in a conversation.
/// NOT_FOUND if the conversation does not exist, FORBIDDEN otherwise.
pub fn require_participant(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
) -> Result<(), StatusCode> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            rusqlite::params![conversation_id],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if !exists {
        return Err(StatusCode::NOT_FOUND);
    }

    let member: bool = conn
        .query_row(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
            rusqlite::params![conversation_id, user_id],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if !member {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}

/// GET /api/conversations — All conversations the authenticated user
/// participates in, newest activity first, with last-message previews.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ConversationView>>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let result = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.is_group, c.group_id, c.created_at, c.updated_at,
                        m.id, m.sender_id, m.content, m.created_at
                 FROM conversations c
                 JOIN conversation_participants cp
                   ON cp.conversation_id = c.id AND cp.user_id = ?1
                 LEFT JOIN messages m ON m.id = c.last_message_id
                 ORDER BY c.updated_at DESC, c.created_at DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut conversations: Vec<ConversationView> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                let last_message = match row.get::<_, Option<String>>(5)? {
                    Some(id) => Some(LastMessagePreview {
                        id,
                        sender_id: row.get(6)?,
                        content: row.get(7)?,
                        created_at: row.get(8)?,
                    }),
                    None => None,
                };
                Ok(ConversationView {
                    id: row.get(0)?,
                    is_group: row.get::<_, i64>(1)? != 0,
                    group_id: row.get(2)?,
                    participants: Vec::new(),
                    last_message,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let mut participants_stmt = conn
            .prepare("SELECT user_id FROM conversation_participants WHERE conversation_id = ?1")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        for conversation in &mut conversations {
            conversation.participants = participants_stmt
                .query_map(rusqlite::params![conversation.id], |row| row.get(0))
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
                .filter_map(|r| r.ok())
                .collect();
        }

        Ok::<_, StatusCode>(conversations)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(result))
}

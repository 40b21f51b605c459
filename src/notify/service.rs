//! Core notify operation and per-user notification REST endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::auth::ActorKind;
use crate::db::DbPool;
use crate::notify::{NotificationView, NotifyInput};
use crate::state::AppState;
use crate::ws::broadcast::send_to_actor;
use crate::ws::events::ServerEvent;

/// Record a notification and deliver it to the recipient if connected.
///
/// Never fails the triggering domain action: self-notifications short-circuit
/// silently, persistence failures are logged and swallowed, and a failed
/// real-time push leaves the durable record as the source of truth.
pub async fn notify(state: &AppState, input: NotifyInput) -> Option<NotificationView> {
    // Liking your own post, replying to yourself, etc. is an expected,
    // frequent no-op — not an error.
    if input.recipient_id == input.sender_id {
        tracing::debug!(
            actor = %input.sender_id,
            kind = input.kind.as_str(),
            "Skipping self-notification"
        );
        return None;
    }

    let db = state.db.clone();
    let for_persist = input.clone();
    let persisted = tokio::task::spawn_blocking(move || persist(&db, &for_persist))
        .await
        .ok()?;

    let view = match persisted {
        Ok(view) => view,
        Err(e) => {
            tracing::warn!(
                recipient = %input.recipient_id,
                kind = input.kind.as_str(),
                error = %e,
                "Failed to persist notification"
            );
            return None;
        }
    };

    // Best-effort immediate delivery; an offline recipient fetches unread
    // records on next connect.
    let delivered = send_to_actor(
        &state.registry,
        ActorKind::User,
        &view.recipient_id,
        &ServerEvent::NewNotification(view.clone()),
    );
    if !delivered {
        tracing::debug!(
            recipient = %view.recipient_id,
            notification_id = %view.id,
            "Recipient offline, notification deferred"
        );
    }

    Some(view)
}

/// Insert the record and build the populated view in one lock scope.
fn persist(db: &DbPool, input: &NotifyInput) -> Result<NotificationView, String> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;

    let id = Uuid::now_v7().to_string();
    let created_at = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO notifications
         (id, recipient_id, sender_id, kind, post_id, comment_id, reply_id,
          appointment_id, message, is_anonymous, read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11)",
        rusqlite::params![
            id,
            input.recipient_id,
            input.sender_id,
            input.kind.as_str(),
            input.post_id,
            input.comment_id,
            input.reply_id,
            input.appointment_id,
            input.message,
            input.is_anonymous as i64,
            created_at,
        ],
    )
    .map_err(|e| e.to_string())?;

    let (sender_name, sender_photo): (String, Option<String>) = conn
        .query_row(
            "SELECT display_name, photo FROM users WHERE id = ?1",
            rusqlite::params![input.sender_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap_or_else(|_| ("Unknown".to_string(), None));

    Ok(NotificationView {
        id,
        recipient_id: input.recipient_id.clone(),
        sender_id: input.sender_id.clone(),
        kind: input.kind.as_str().to_string(),
        post_id: input.post_id.clone(),
        comment_id: input.comment_id.clone(),
        reply_id: input.reply_id.clone(),
        appointment_id: input.appointment_id.clone(),
        message: input.message.clone(),
        is_anonymous: input.is_anonymous,
        read: false,
        created_at,
        sender_name,
        sender_photo,
    })
}

/// GET /api/notifications — All records for the authenticated recipient,
/// newest first, with sender display fields populated.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<NotificationView>>, StatusCode> {
    let db = state.db.clone();
    let recipient_id = claims.sub.clone();

    let result = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT n.id, n.recipient_id, n.sender_id, n.kind, n.post_id,
                        n.comment_id, n.reply_id, n.appointment_id, n.message,
                        n.is_anonymous, n.read, n.created_at,
                        u.display_name, u.photo
                 FROM notifications n
                 LEFT JOIN users u ON u.id = n.sender_id
                 WHERE n.recipient_id = ?1
                 ORDER BY n.created_at DESC, n.id DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let notifications: Vec<NotificationView> = stmt
            .query_map(rusqlite::params![recipient_id], |row| {
                Ok(NotificationView {
                    id: row.get(0)?,
                    recipient_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    kind: row.get(3)?,
                    post_id: row.get(4)?,
                    comment_id: row.get(5)?,
                    reply_id: row.get(6)?,
                    appointment_id: row.get(7)?,
                    message: row.get(8)?,
                    is_anonymous: row.get::<_, i64>(9)? != 0,
                    read: row.get::<_, i64>(10)? != 0,
                    created_at: row.get(11)?,
                    sender_name: row
                        .get::<_, Option<String>>(12)?
                        .unwrap_or_else(|| "Unknown".to_string()),
                    sender_photo: row.get(13)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>(notifications)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(result))
}

/// PUT /api/notifications/read-all — Bulk-transition all unread records for
/// the authenticated recipient. Idempotent.
pub async fn mark_all_read(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let recipient_id = claims.sub.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute(
            "UPDATE notifications SET read = 1 WHERE recipient_id = ?1 AND read = 0",
            rusqlite::params![recipient_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<(), StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(StatusCode::OK)
}

/// PUT /api/notifications/{id}/read — Scoped single-record transition.
/// The WHERE clause binds the recipient, so a record belonging to another
/// account matches zero rows and nothing is mutated.
pub async fn mark_one_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let recipient_id = claims.sub.clone();

    let updated = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let rows = conn
            .execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND recipient_id = ?2",
                rusqlite::params![notification_id, recipient_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<usize, StatusCode>(rows)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if updated == 0 {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::OK)
}

//! Admin broadcast channel: operational events for dashboard consumption.
//!
//! A degenerate case of the notification service with the admin room as a
//! fixed recipient. Records land in a shared admin inbox (no per-recipient
//! scoping) with its own unread-count and mark-read operations.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::DbPool;
use crate::state::AppState;
use crate::ws::broadcast::send_to_room;
use crate::ws::events::ServerEvent;
use crate::ws::rooms::ADMIN_ROOM;

/// Operational event types surfaced on the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminEventKind {
    Signup,
    NewPost,
    ContactRequest,
    Appointment,
}

impl AdminEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::NewPost => "new_post",
            Self::ContactRequest => "contact_request",
            Self::Appointment => "appointment",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminNotificationView {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: String,
}

/// Persist an admin notification and emit it to the admin room.
/// Same contract as notify: failures are logged, never propagated to the
/// triggering domain action.
pub async fn broadcast_admin_event(
    state: &AppState,
    kind: AdminEventKind,
    title: &str,
    message: &str,
    data: Option<serde_json::Value>,
) -> Option<AdminNotificationView> {
    let db = state.db.clone();
    let title = title.to_string();
    let message = message.to_string();
    let data_for_persist = data.clone();

    let persisted = tokio::task::spawn_blocking(move || {
        persist(&db, kind, &title, &message, data_for_persist)
    })
    .await
    .ok()?;

    let view = match persisted {
        Ok(view) => view,
        Err(e) => {
            tracing::warn!(
                kind = kind.as_str(),
                error = %e,
                "Failed to persist admin notification"
            );
            return None;
        }
    };

    send_to_room(
        &state.registry,
        &state.rooms,
        ADMIN_ROOM,
        &ServerEvent::AdminNotification(view.clone()),
        None,
    );

    Some(view)
}

fn persist(
    db: &DbPool,
    kind: AdminEventKind,
    title: &str,
    message: &str,
    data: Option<serde_json::Value>,
) -> Result<AdminNotificationView, String> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;

    let id = Uuid::now_v7().to_string();
    let created_at = Utc::now().to_rfc3339();
    let data_text = data.as_ref().map(|v| v.to_string());

    conn.execute(
        "INSERT INTO admin_notifications (id, kind, title, message, data, read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        rusqlite::params![id, kind.as_str(), title, message, data_text, created_at],
    )
    .map_err(|e| e.to_string())?;

    Ok(AdminNotificationView {
        id,
        kind: kind.as_str().to_string(),
        title: title.to_string(),
        message: message.to_string(),
        data,
        read: false,
        created_at,
    })
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

/// GET /api/admin/notifications — Shared inbox, newest first. Admin only.
pub async fn list_admin_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<AdminNotificationView>>, StatusCode> {
    claims.require_admin()?;

    let db = state.db.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, kind, title, message, data, read, created_at
                 FROM admin_notifications
                 ORDER BY created_at DESC, id DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let notifications: Vec<AdminNotificationView> = stmt
            .query_map([], |row| {
                let data_text: Option<String> = row.get(4)?;
                Ok(AdminNotificationView {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    title: row.get(2)?,
                    message: row.get(3)?,
                    data: data_text.and_then(|t| serde_json::from_str(&t).ok()),
                    read: row.get::<_, i64>(5)? != 0,
                    created_at: row.get(6)?,
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

/// GET /api/admin/notifications/unread-count — Admin only.
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UnreadCountResponse>, StatusCode> {
    claims.require_admin()?;

    let db = state.db.clone();
    let count = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.query_row(
            "SELECT COUNT(*) FROM admin_notifications WHERE read = 0",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(UnreadCountResponse { count }))
}

/// PUT /api/admin/notifications/read-all — Admin only. Idempotent.
pub async fn mark_all_read(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<StatusCode, StatusCode> {
    claims.require_admin()?;

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.execute("UPDATE admin_notifications SET read = 1 WHERE read = 0", [])
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<(), StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(StatusCode::OK)
}

/// PUT /api/admin/notifications/{id}/read — Admin only.
pub async fn mark_one_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    claims.require_admin()?;

    let db = state.db.clone();
    let updated = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let rows = conn
            .execute(
                "UPDATE admin_notifications SET read = 1 WHERE id = ?1",
                rusqlite::params![id],
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

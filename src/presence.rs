//! Presence tracking: persisted online/last-seen state plus live broadcasts.
//!
//! Connect handling runs mark_online fully (persist, then broadcast) before
//! the connection's reader loop starts, and disconnect cleanup runs
//! mark_offline as the terminal step of the actor, so presence broadcasts
//! for one actor are monotonic within a connection epoch.

use chrono::Utc;

use crate::auth::ActorKind;
use crate::state::AppState;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::events::ServerEvent;

/// Persist `is_online = true` and broadcast the change to everyone,
/// followed by the full current online-user set for bulk badge painting.
pub async fn mark_online(state: &AppState, kind: ActorKind, actor_id: &str) {
    if !persist(state, kind, actor_id, true, None).await {
        return;
    }

    broadcast_to_all(
        &state.registry,
        &ServerEvent::PresenceUpdate {
            actor_id: actor_id.to_string(),
            is_online: true,
            last_seen: None,
        },
    );
    broadcast_to_all(
        &state.registry,
        &ServerEvent::OnlineUsers(state.registry.online_user_ids()),
    );
}

/// Persist `is_online = false` with a fresh last-seen timestamp and
/// broadcast the change.
pub async fn mark_offline(state: &AppState, kind: ActorKind, actor_id: &str) {
    let last_seen = Utc::now().to_rfc3339();

    if !persist(state, kind, actor_id, false, Some(last_seen.clone())).await {
        return;
    }

    broadcast_to_all(
        &state.registry,
        &ServerEvent::PresenceUpdate {
            actor_id: actor_id.to_string(),
            is_online: false,
            last_seen: Some(last_seen),
        },
    );
}

/// Write the presence columns on the actor's own row. Returns false if the
/// write failed or the actor row does not exist; the caller skips the
/// broadcast in that case.
async fn persist(
    state: &AppState,
    kind: ActorKind,
    actor_id: &str,
    is_online: bool,
    last_seen: Option<String>,
) -> bool {
    let db = state.db.clone();
    let id = actor_id.to_string();

    let result = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        let sql = format!(
            "UPDATE {} SET is_online = ?1, last_seen = COALESCE(?2, last_seen) WHERE id = ?3",
            kind.table()
        );
        conn.execute(&sql, rusqlite::params![is_online as i64, last_seen, id])
            .ok()
    })
    .await
    .ok()
    .flatten();

    match result {
        Some(rows) if rows > 0 => true,
        Some(_) => {
            tracing::warn!(actor_id = %actor_id, kind = kind.as_str(), "Presence update for unknown actor");
            false
        }
        None => {
            tracing::warn!(actor_id = %actor_id, "Failed to persist presence state");
            false
        }
    }
}

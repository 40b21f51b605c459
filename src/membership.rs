//! Room/membership resolution.
//!
//! Computes which channels an actor joins at connect time and attaches live
//! connections to channels created mid-session (group join, first direct
//! message) without requiring a reconnect.

use crate::auth::ActorKind;
use crate::db::DbPool;
use crate::state::AppState;
use crate::ws::rooms::{conversation_room, ActorKey, ADMIN_ROOM};

/// Channels an actor subscribes to on connect: one per conversation the
/// actor currently participates in, plus the admin broadcast room for
/// admins. Direct-to-actor delivery goes through the registry, not a room.
pub async fn channels_for_actor(db: &DbPool, kind: ActorKind, actor_id: &str) -> Vec<String> {
    match kind {
        ActorKind::Admin => vec![ADMIN_ROOM.to_string()],
        ActorKind::User => {
            let db = db.clone();
            let id = actor_id.to_string();

            tokio::task::spawn_blocking(move || {
                let conn = db.lock().ok()?;
                let mut stmt = conn
                    .prepare(
                        "SELECT conversation_id FROM conversation_participants WHERE user_id = ?1",
                    )
                    .ok()?;
                let channels = stmt
                    .query_map(rusqlite::params![id], |row| row.get::<_, String>(0))
                    .ok()?
                    .filter_map(|r| r.ok())
                    .map(|conv_id| conversation_room(&conv_id))
                    .collect::<Vec<_>>();
                Some(channels)
            })
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
        }
    }
}

/// Attach a user's live connection (if any) to a conversation channel.
/// Used when a group is joined or a direct conversation is created while
/// the user is already connected.
pub fn subscribe_if_connected(state: &AppState, user_id: &str, conversation_id: &str) {
    if state.registry.lookup(ActorKind::User, user_id).is_some() {
        let key: ActorKey = (ActorKind::User, user_id.to_string());
        state.rooms.subscribe(&conversation_room(conversation_id), &key);
    }
}

/// Detach a user's connection from a conversation channel (group leave).
pub fn unsubscribe_if_connected(state: &AppState, user_id: &str, conversation_id: &str) {
    let key: ActorKey = (ActorKind::User, user_id.to_string());
    state.rooms.unsubscribe(&conversation_room(conversation_id), &key);
}

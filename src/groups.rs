//! Groups with mirrored conversations.
//!
//! Every group owns exactly one group conversation whose participant set
//! mirrors group membership. Creation is a single transaction so a failure
//! cannot leave a group without a conversation or vice versa. The stored
//! members_count is a cache; the broadcast count is always recomputed from
//! the membership rows.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::membership::{subscribe_if_connected, unsubscribe_if_connected};
use crate::state::AppState;
use crate::ws::broadcast::broadcast_to_all;
use crate::ws::events::ServerEvent;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub creator_id: String,
    pub conversation_id: String,
    pub members_count: i64,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleMembershipResponse {
    pub joined: bool,
    pub members_count: i64,
}

/// POST /api/groups — Create a group with its mirrored conversation,
/// seeded with the creator as the single member.
pub async fn create_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupView>), StatusCode> {
    if body.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let creator_id = claims.sub.clone();
    let name = body.name.trim().to_string();

    let view = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let group_id = Uuid::now_v7().to_string();
        let conversation_id = Uuid::now_v7().to_string();
        let created_at = Utc::now().to_rfc3339();

        // Group, conversation, membership, and participant rows commit
        // together or not at all.
        let tx = conn
            .transaction()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        // Same RFC3339 format message sends stamp on updated_at, so the
        // string-ordered conversation listing stays coherent.
        tx.execute(
            "INSERT INTO conversations (id, is_group, group_id, created_at, updated_at)
             VALUES (?1, 1, ?2, ?3, ?3)",
            rusqlite::params![conversation_id, group_id, created_at],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "INSERT INTO groups (id, name, creator_id, conversation_id, members_count, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            rusqlite::params![group_id, name, creator_id, conversation_id, created_at],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "INSERT INTO group_members (group_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![group_id, creator_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![conversation_id, creator_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>(GroupView {
            id: group_id,
            name,
            creator_id,
            conversation_id,
            members_count: 1,
            created_at,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    subscribe_if_connected(&state, &view.creator_id, &view.conversation_id);
    broadcast_to_all(&state.registry, &ServerEvent::GroupCreated(view.clone()));

    Ok((StatusCode::CREATED, Json(view)))
}

/// POST /api/groups/{id}/toggle-membership — Join if not a member, leave
/// otherwise. The mirrored conversation's participant set changes in the
/// same transaction, a live connection is (un)subscribed without reconnect,
/// and the recomputed authoritative count is broadcast to all clients.
pub async fn toggle_membership(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
) -> Result<Json<ToggleMembershipResponse>, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let gid = group_id.clone();

    let (joined, members_count, conversation_id) = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let conversation_id: String = conn
            .query_row(
                "SELECT conversation_id FROM groups WHERE id = ?1",
                rusqlite::params![gid],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::NOT_FOUND)?;

        let is_member: bool = conn
            .query_row(
                "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                rusqlite::params![gid, user_id],
                |_| Ok(true),
            )
            .unwrap_or(false);

        let tx = conn
            .transaction()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if is_member {
            tx.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                rusqlite::params![gid, user_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            tx.execute(
                "DELETE FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation_id, user_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        } else {
            tx.execute(
                "INSERT INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![gid, user_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            tx.execute(
                "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![conversation_id, user_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }

        // Recompute from the membership rows, the source of truth, to
        // self-heal any drift in the cached counter.
        let members_count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
                rusqlite::params![gid],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.execute(
            "UPDATE groups SET members_count = ?1 WHERE id = ?2",
            rusqlite::params![members_count, gid],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        tx.commit().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>((!is_member, members_count, conversation_id))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if joined {
        subscribe_if_connected(&state, &claims.sub, &conversation_id);
    } else {
        unsubscribe_if_connected(&state, &claims.sub, &conversation_id);
    }

    broadcast_to_all(
        &state.registry,
        &ServerEvent::GroupUpdate {
            group_id,
            members_count,
        },
    );

    Ok(Json(ToggleMembershipResponse {
        joined,
        members_count,
    }))
}

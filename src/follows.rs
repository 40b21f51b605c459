//! Follow toggle — the in-scope trigger endpoint for the notification
//! service. Unfollow is silent; a new follow notifies the followee.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::notify::service::notify;
use crate::notify::{NotificationKind, NotifyInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFollowRequest {
    pub target_id: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleFollowResponse {
    pub following: bool,
}

/// POST /api/follows/toggle
pub async fn toggle_follow(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<ToggleFollowRequest>,
) -> Result<Json<ToggleFollowResponse>, StatusCode> {
    if body.target_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let follower_id = claims.sub.clone();
    let target_id = body.target_id.clone();

    let following = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let target_exists: bool = conn
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                rusqlite::params![target_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !target_exists {
            return Err(StatusCode::NOT_FOUND);
        }

        let removed = conn
            .execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                rusqlite::params![follower_id, target_id],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if removed > 0 {
            return Ok::<bool, StatusCode>(false);
        }

        conn.execute(
            "INSERT INTO follows (follower_id, followee_id) VALUES (?1, ?2)",
            rusqlite::params![follower_id, target_id],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok(true)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if following {
        // The follow itself already succeeded; notification fan-out never
        // fails this request.
        notify(
            &state,
            NotifyInput::new(&body.target_id, &claims.sub, NotificationKind::Follow),
        )
        .await;
    }

    Ok(Json(ToggleFollowResponse { following }))
}

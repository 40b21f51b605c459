//! Integration tests for notification persistence, delivery, and read-state.
//! Covers the self-notification guard, offline durability, idempotent
//! read transitions, cross-account isolation, and the follow trigger.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use hearth_server::auth::{jwt, ActorKind};
use hearth_server::notify::service::notify;
use hearth_server::notify::{NotificationKind, NotifyInput};
use hearth_server::state::AppState;

/// Helper: start the server on a random port and return (base_url, state).
async fn start_test_server() -> (String, AppState) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = hearth_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret =
        jwt::load_or_generate_jwt_secret(&data_dir).expect("Failed to generate JWT secret");

    let state = AppState::new(db, jwt_secret);
    let app = hearth_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (format!("http://{}", addr), state)
}

fn seed_user(state: &AppState, id: &str, name: &str) {
    let conn = state.db.lock().unwrap();
    conn.execute(
        "INSERT INTO users (id, display_name) VALUES (?1, ?2)",
        rusqlite::params![id, name],
    )
    .unwrap();
}

fn seed_admin(state: &AppState, id: &str, name: &str) {
    let conn = state.db.lock().unwrap();
    conn.execute(
        "INSERT INTO admins (id, display_name) VALUES (?1, ?2)",
        rusqlite::params![id, name],
    )
    .unwrap();
}

fn user_token(state: &AppState, id: &str) -> String {
    jwt::issue_access_token(&state.jwt_secret, id, ActorKind::User).unwrap()
}

fn admin_token(state: &AppState, id: &str) -> String {
    jwt::issue_access_token(&state.jwt_secret, id, ActorKind::Admin).unwrap()
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect_ws(base_url: &str, token: &str) -> WsStream {
    let ws_url = format!("{}/ws?token={}", base_url.replacen("http", "ws", 1), token);
    let (socket, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .expect("WS connect failed");
    socket
}

/// Read frames until the named event arrives, returning its data payload.
async fn wait_for_event(socket: &mut WsStream, event: &str) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {} event", event))
            .expect("WS stream ended")
            .expect("WS receive error");
        if let Message::Text(text) = frame {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["event"] == event {
                return value["data"].clone();
            }
        }
    }
}

async fn list_notifications(base_url: &str, token: &str) -> Vec<serde_json::Value> {
    let response = reqwest::Client::new()
        .get(format!("{}/api/notifications", base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn self_notification_is_never_created() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");

    // Commenting on your own post goes through the same code path but must
    // short-circuit to zero records.
    let result = notify(
        &state,
        NotifyInput::new("alice", "alice", NotificationKind::Comment),
    )
    .await;
    assert!(result.is_none());

    let records = list_notifications(&base_url, &user_token(&state, "alice")).await;
    assert!(records.is_empty());
}

#[tokio::test]
async fn offline_notification_is_durable_and_retrievable() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");

    // Bob is offline — exactly one record must still be persisted.
    let mut input = NotifyInput::new("bob", "alice", NotificationKind::Like);
    input.post_id = Some("post-1".to_string());
    let view = notify(&state, input).await.expect("notify returned None");
    assert_eq!(view.recipient_id, "bob");
    assert!(!view.read);

    let records = list_notifications(&base_url, &user_token(&state, "bob")).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["kind"], "like");
    assert_eq!(records[0]["senderId"], "alice");
    assert_eq!(records[0]["senderName"], "Alice");
    assert_eq!(records[0]["postId"], "post-1");
    assert_eq!(records[0]["read"], false);
}

#[tokio::test]
async fn list_is_newest_first() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");

    notify(
        &state,
        NotifyInput::new("bob", "alice", NotificationKind::Like),
    )
    .await
    .unwrap();
    notify(
        &state,
        NotifyInput::new("bob", "alice", NotificationKind::Follow),
    )
    .await
    .unwrap();

    let records = list_notifications(&base_url, &user_token(&state, "bob")).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["kind"], "follow");
    assert_eq!(records[1]["kind"], "like");
}

#[tokio::test]
async fn mark_all_read_is_idempotent() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");
    let token = user_token(&state, "bob");

    for kind in [NotificationKind::Like, NotificationKind::Comment] {
        notify(&state, NotifyInput::new("bob", "alice", kind))
            .await
            .unwrap();
    }

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let response = client
            .put(format!("{}/api/notifications/read-all", base_url))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let records = list_notifications(&base_url, &token).await;
    assert!(records.iter().all(|n| n["read"] == true));
}

#[tokio::test]
async fn mark_one_read_is_recipient_scoped() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");
    seed_user(&state, "mallory", "Mallory");

    let view = notify(
        &state,
        NotifyInput::new("bob", "alice", NotificationKind::Reply),
    )
    .await
    .unwrap();

    let client = reqwest::Client::new();
    let url = format!("{}/api/notifications/{}/read", base_url, view.id);

    // Another account must fail to mutate and must not affect Bob's view
    let response = client
        .put(&url)
        .bearer_auth(user_token(&state, "mallory"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let records = list_notifications(&base_url, &user_token(&state, "bob")).await;
    assert_eq!(records[0]["read"], false);

    // The owner can mark it, and re-marking is a no-op, not an error
    for _ in 0..2 {
        let response = client
            .put(&url)
            .bearer_auth(user_token(&state, "bob"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let records = list_notifications(&base_url, &user_token(&state, "bob")).await;
    assert_eq!(records[0]["read"], true);
}

#[tokio::test]
async fn follow_notifies_the_followee_in_real_time() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");

    let mut bob_socket = connect_ws(&base_url, &user_token(&state, "bob")).await;
    // The connect-time online snapshot doubles as a registration barrier
    wait_for_event(&mut bob_socket, "onlineUsers").await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/follows/toggle", base_url))
        .bearer_auth(user_token(&state, "alice"))
        .json(&serde_json::json!({ "targetId": "bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["following"], true);

    let data = wait_for_event(&mut bob_socket, "new_notification").await;
    assert_eq!(data["kind"], "follow");
    assert_eq!(data["senderId"], "alice");
    assert_eq!(data["senderName"], "Alice");
    assert_eq!(data["recipientId"], "bob");
    assert_eq!(data["read"], false);

    // Exactly one durable record regardless of the live push
    let records = list_notifications(&base_url, &user_token(&state, "bob")).await;
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn unfollow_is_silent() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");
    let alice = user_token(&state, "alice");

    let client = reqwest::Client::new();
    for expected in [true, false] {
        let response = client
            .post(format!("{}/api/follows/toggle", base_url))
            .bearer_auth(&alice)
            .json(&serde_json::json!({ "targetId": "bob" }))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["following"], expected);
    }

    // Only the follow produced a record, not the unfollow
    let records = list_notifications(&base_url, &user_token(&state, "bob")).await;
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn admin_broadcast_goes_to_the_shared_inbox() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_admin(&state, "root", "Root");
    let admin = admin_token(&state, "root");

    let mut admin_socket = connect_ws(&base_url, &admin).await;
    // Snapshot frame confirms the admin-room subscription is in place
    wait_for_event(&mut admin_socket, "onlineUsers").await;

    hearth_server::notify::admin::broadcast_admin_event(
        &state,
        hearth_server::notify::admin::AdminEventKind::Signup,
        "New signup",
        "Alice joined",
        Some(serde_json::json!({ "userId": "alice" })),
    )
    .await
    .expect("admin broadcast failed");

    let data = wait_for_event(&mut admin_socket, "admin_notification").await;
    assert_eq!(data["kind"], "signup");
    assert_eq!(data["title"], "New signup");
    assert_eq!(data["data"]["userId"], "alice");

    let client = reqwest::Client::new();

    // A regular user may not read the admin inbox
    let response = client
        .get(format!("{}/api/admin/notifications", base_url))
        .bearer_auth(user_token(&state, "alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = client
        .get(format!("{}/api/admin/notifications/unread-count", base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["count"], 1);

    let response = client
        .put(format!("{}/api/admin/notifications/read-all", base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("{}/api/admin/notifications/unread-count", base_url))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["count"], 0);
}

//! Integration tests for the conversational messaging relay: direct
//! conversation uniqueness, persist-before-relay ordering, author-only
//! edit/delete, read receipts, typing, and per-viewer clears.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use hearth_server::auth::{jwt, ActorKind};
use hearth_server::state::AppState;

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

fn user_token(state: &AppState, id: &str) -> String {
    jwt::issue_access_token(&state.jwt_secret, id, ActorKind::User).unwrap()
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

async fn send_command(socket: &mut WsStream, event: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "event": event, "data": data }).to_string();
    socket.send(Message::Text(frame.into())).await.unwrap();
}

async fn send_direct(
    base_url: &str,
    token: &str,
    receiver_id: &str,
    content: &str,
) -> serde_json::Value {
    let response = reqwest::Client::new()
        .post(format!("{}/api/messages", base_url))
        .bearer_auth(token)
        .json(&serde_json::json!({ "receiverId": receiver_id, "content": content }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    response.json().await.unwrap()
}

async fn list_conversations(base_url: &str, token: &str) -> Vec<serde_json::Value> {
    let response = reqwest::Client::new()
        .get(format!("{}/api/conversations", base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

async fn list_messages(base_url: &str, token: &str, conversation_id: &str) -> Vec<serde_json::Value> {
    let response = reqwest::Client::new()
        .get(format!(
            "{}/api/conversations/{}/messages",
            base_url, conversation_id
        ))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn repeated_sends_reuse_one_direct_conversation() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");
    let alice = user_token(&state, "alice");
    let bob = user_token(&state, "bob");

    let first = send_direct(&base_url, &alice, "bob", "hello").await;
    let second = send_direct(&base_url, &alice, "bob", "again").await;
    // Replying through receiverId resolves to the same conversation too
    let reply = send_direct(&base_url, &bob, "alice", "hi back").await;

    assert_eq!(first["conversationId"], second["conversationId"]);
    assert_eq!(first["conversationId"], reply["conversationId"]);

    let conversations = list_conversations(&base_url, &alice).await;
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["isGroup"], false);
    let mut participants: Vec<String> =
        serde_json::from_value(conversations[0]["participants"].clone()).unwrap();
    participants.sort();
    assert_eq!(participants, vec!["alice", "bob"]);
    assert_eq!(conversations[0]["lastMessage"]["content"], "hi back");
}

#[tokio::test]
async fn offline_send_is_durable_and_unread() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");

    // Bob never connects; the message must still be waiting for him
    let sent = send_direct(&base_url, &user_token(&state, "alice"), "bob", "are you there?").await;
    let conversation_id = sent["conversationId"].as_str().unwrap();

    let messages = list_messages(&base_url, &user_token(&state, "bob"), conversation_id).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "are you there?");
    assert_eq!(messages[0]["senderName"], "Alice");
    assert_eq!(messages[0]["read"], false);
}

#[tokio::test]
async fn ws_send_relays_to_both_participants() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");

    let mut alice_socket = connect_ws(&base_url, &user_token(&state, "alice")).await;
    let mut bob_socket = connect_ws(&base_url, &user_token(&state, "bob")).await;
    // The connect-time online snapshot doubles as a registration barrier
    wait_for_event(&mut alice_socket, "onlineUsers").await;
    wait_for_event(&mut bob_socket, "onlineUsers").await;

    send_command(
        &mut alice_socket,
        "send_message",
        serde_json::json!({ "receiverId": "bob", "content": "ping" }),
    )
    .await;

    let received = wait_for_event(&mut bob_socket, "receive_message").await;
    assert_eq!(received["content"], "ping");
    assert_eq!(received["senderId"], "alice");
    assert_eq!(received["senderName"], "Alice");

    // The sender's own connection gets the echo for multi-tab consistency
    let echo = wait_for_event(&mut alice_socket, "receive_message").await;
    assert_eq!(echo["id"], received["id"]);

    // Persisted before the relay
    let conversation_id = received["conversationId"].as_str().unwrap();
    let messages =
        list_messages(&base_url, &user_token(&state, "bob"), conversation_id).await;
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn only_the_author_can_edit_or_delete() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");
    let alice = user_token(&state, "alice");
    let bob = user_token(&state, "bob");

    let sent = send_direct(&base_url, &alice, "bob", "original").await;
    let message_id = sent["id"].as_str().unwrap();
    let client = reqwest::Client::new();

    let response = client
        .put(format!("{}/api/messages/{}", base_url, message_id))
        .bearer_auth(&bob)
        .json(&serde_json::json!({ "content": "hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = client
        .delete(format!("{}/api/messages/{}", base_url, message_id))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    // The author succeeds and the other participant sees the edit live
    let mut bob_socket = connect_ws(&base_url, &bob).await;
    wait_for_event(&mut bob_socket, "onlineUsers").await;
    let response = client
        .put(format!("{}/api/messages/{}", base_url, message_id))
        .bearer_auth(&alice)
        .json(&serde_json::json!({ "content": "fixed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let edited = wait_for_event(&mut bob_socket, "message_edited").await;
    assert_eq!(edited["messageId"], message_id);
    assert_eq!(edited["content"], "fixed");
}

#[tokio::test]
async fn delete_clears_the_last_message_preview() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");
    let alice = user_token(&state, "alice");

    let sent = send_direct(&base_url, &alice, "bob", "oops").await;
    let message_id = sent["id"].as_str().unwrap();

    let mut bob_socket = connect_ws(&base_url, &user_token(&state, "bob")).await;
    wait_for_event(&mut bob_socket, "onlineUsers").await;
    let response = reqwest::Client::new()
        .delete(format!("{}/api/messages/{}", base_url, message_id))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let deleted = wait_for_event(&mut bob_socket, "message_deleted").await;
    assert_eq!(deleted["messageId"], message_id);

    let conversations = list_conversations(&base_url, &alice).await;
    assert_eq!(conversations.len(), 1);
    assert!(conversations[0]["lastMessage"].is_null());
}

#[tokio::test]
async fn read_receipts_relay_to_the_sender_only() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");
    let alice = user_token(&state, "alice");
    let bob = user_token(&state, "bob");

    let sent = send_direct(&base_url, &alice, "bob", "read me").await;
    let conversation_id = sent["conversationId"].as_str().unwrap().to_string();

    let mut alice_socket = connect_ws(&base_url, &alice).await;
    wait_for_event(&mut alice_socket, "onlineUsers").await;
    let client = reqwest::Client::new();
    for _ in 0..2 {
        let response = client
            .put(format!(
                "{}/api/conversations/{}/read",
                base_url, conversation_id
            ))
            .bearer_auth(&bob)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    let receipt = wait_for_event(&mut alice_socket, "messages_read").await;
    assert_eq!(receipt["conversationId"], conversation_id);
    assert_eq!(receipt["readerId"], "bob");

    let messages = list_messages(&base_url, &alice, &conversation_id).await;
    assert_eq!(messages[0]["read"], true);
}

#[tokio::test]
async fn typing_relays_with_display_name() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");

    let mut alice_socket = connect_ws(&base_url, &user_token(&state, "alice")).await;
    let mut bob_socket = connect_ws(&base_url, &user_token(&state, "bob")).await;
    wait_for_event(&mut alice_socket, "onlineUsers").await;
    wait_for_event(&mut bob_socket, "onlineUsers").await;

    // First send creates the conversation and subscribes both live sockets
    send_command(
        &mut alice_socket,
        "send_message",
        serde_json::json!({ "receiverId": "bob", "content": "hi" }),
    )
    .await;
    let received = wait_for_event(&mut bob_socket, "receive_message").await;
    let conversation_id = received["conversationId"].as_str().unwrap().to_string();

    send_command(
        &mut alice_socket,
        "typing",
        serde_json::json!({ "conversationId": conversation_id }),
    )
    .await;
    let typing = wait_for_event(&mut bob_socket, "user_typing").await;
    assert_eq!(typing["userId"], "alice");
    assert_eq!(typing["userName"], "Alice");

    send_command(
        &mut alice_socket,
        "stop_typing",
        serde_json::json!({ "conversationId": conversation_id }),
    )
    .await;
    let stopped = wait_for_event(&mut bob_socket, "user_stop_typing").await;
    assert_eq!(stopped["userId"], "alice");
}

#[tokio::test]
async fn clear_conversation_is_per_viewer() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");
    let alice = user_token(&state, "alice");
    let bob = user_token(&state, "bob");

    let sent = send_direct(&base_url, &alice, "bob", "one").await;
    let conversation_id = sent["conversationId"].as_str().unwrap().to_string();
    send_direct(&base_url, &alice, "bob", "two").await;

    let response = reqwest::Client::new()
        .delete(format!(
            "{}/api/conversations/{}/messages",
            base_url, conversation_id
        ))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Hidden for the clearing viewer, untouched for the other participant
    let bob_view = list_messages(&base_url, &bob, &conversation_id).await;
    assert!(bob_view.is_empty());
    let alice_view = list_messages(&base_url, &alice, &conversation_id).await;
    assert_eq!(alice_view.len(), 2);
}

#[tokio::test]
async fn invalid_sends_are_rejected_without_persisting() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");
    let alice = user_token(&state, "alice");
    let client = reqwest::Client::new();

    // Self-DM
    let response = client
        .post(format!("{}/api/messages", base_url))
        .bearer_auth(&alice)
        .json(&serde_json::json!({ "receiverId": "alice", "content": "hi me" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown receiver
    let response = client
        .post(format!("{}/api/messages", base_url))
        .bearer_auth(&alice)
        .json(&serde_json::json!({ "receiverId": "ghost", "content": "hello?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Neither conversation nor receiver
    let response = client
        .post(format!("{}/api/messages", base_url))
        .bearer_auth(&alice)
        .json(&serde_json::json!({ "content": "lost" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let conn = state.db.lock().unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn malformed_ws_command_yields_error_event() {
    let (base_url, state) = start_test_server().await;
    seed_user(&state, "alice", "Alice");

    let mut socket = connect_ws(&base_url, &user_token(&state, "alice")).await;
    socket
        .send(Message::Text(r#"{"event":"bogus"}"#.into()))
        .await
        .unwrap();

    let error = wait_for_event(&mut socket, "error").await;
    assert_eq!(error["code"], 400);
}

//! JSON wire protocol for the WebSocket channel.
//!
//! Every frame is a text envelope `{"event": <name>, "data": <payload>}`.
//! Event names are part of the client contract and never change spelling.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::dm::MessageView;
use crate::groups::GroupView;
use crate::notify::{AdminNotificationView, NotificationView};

/// Server-to-client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "new_notification")]
    NewNotification(NotificationView),
    #[serde(rename = "admin_notification")]
    AdminNotification(AdminNotificationView),
    #[serde(rename = "presenceUpdate")]
    PresenceUpdate {
        #[serde(rename = "actorId")]
        actor_id: String,
        #[serde(rename = "isOnline")]
        is_online: bool,
        #[serde(rename = "lastSeen", skip_serializing_if = "Option::is_none")]
        last_seen: Option<String>,
    },
    /// Full array of currently-online user ids — a convenience projection
    /// for bulk badge painting, not authoritative.
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<String>),
    #[serde(rename = "group_update")]
    GroupUpdate {
        #[serde(rename = "groupId")]
        group_id: String,
        #[serde(rename = "membersCount")]
        members_count: i64,
    },
    #[serde(rename = "group_created")]
    GroupCreated(GroupView),
    #[serde(rename = "receive_message")]
    ReceiveMessage(MessageView),
    #[serde(rename = "message_edited")]
    MessageEdited {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
    },
    #[serde(rename = "message_deleted")]
    MessageDeleted {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    #[serde(rename = "user_typing")]
    UserTyping {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "userName", skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    #[serde(rename = "user_stop_typing")]
    UserStopTyping {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "messages_read")]
    MessagesRead {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "readerId")]
        reader_id: String,
    },
    #[serde(rename = "conversation_cleared")]
    ConversationCleared {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    #[serde(rename = "error")]
    Error { code: u16, message: String },
}

impl ServerEvent {
    /// Serialize to a WebSocket text frame. Serialization of these enums
    /// cannot fail; a failure here would be a programming error, so it is
    /// logged and mapped to an error frame.
    pub fn to_message(&self) -> Message {
        match serde_json::to_string(self) {
            Ok(json) => Message::Text(json.into()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server event");
                Message::Text(
                    r#"{"event":"error","data":{"code":500,"message":"serialization failure"}}"#
                        .into(),
                )
            }
        }
    }
}

/// Client-to-server commands.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    SendMessage(SendMessagePayload),
    EditMessage(EditMessagePayload),
    DeleteMessage(DeleteMessagePayload),
    Typing(TypingPayload),
    StopTyping(TypingPayload),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub receiver_id: Option<String>,
    pub conversation_id: Option<String>,
    pub content: String,
    pub attachment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagePayload {
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_uses_contract_names() {
        let event = ServerEvent::PresenceUpdate {
            actor_id: "u1".to_string(),
            is_online: true,
            last_seen: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "presenceUpdate");
        assert_eq!(json["data"]["actorId"], "u1");
        assert_eq!(json["data"]["isOnline"], true);
        assert!(json["data"].get("lastSeen").is_none());
    }

    #[test]
    fn online_users_is_a_bare_array() {
        let event = ServerEvent::OnlineUsers(vec!["a".into(), "b".into()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "onlineUsers");
        assert_eq!(json["data"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn client_command_round_trips_send_message() {
        let frame = r#"{"event":"send_message","data":{"receiverId":"u2","content":"hi"}}"#;
        let cmd: ClientCommand = serde_json::from_str(frame).unwrap();
        match cmd {
            ClientCommand::SendMessage(p) => {
                assert_eq!(p.receiver_id.as_deref(), Some("u2"));
                assert_eq!(p.content, "hi");
                assert!(p.conversation_id.is_none());
                assert!(p.attachment.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn unknown_client_event_is_rejected() {
        let frame = r#"{"event":"self_destruct","data":{}}"#;
        assert!(serde_json::from_str::<ClientCommand>(frame).is_err());
    }
}

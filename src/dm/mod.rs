//! Conversational messaging relay.
//!
//! Direct and group messages are persisted synchronously before any relay;
//! the real-time push to conversation participants is a best-effort
//! accelerant on top of the durable record.

pub mod conversations;
pub mod messages;

use serde::Serialize;

/// A persisted message projected for transmission/display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub read: bool,
    pub created_at: String,
    pub sender_name: String,
}

/// Last-message preview embedded in a conversation listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessagePreview {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: String,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessagePreview>,
    pub created_at: String,
    pub updated_at: String,
}

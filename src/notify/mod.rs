//! Notification persistence & delivery.
//!
//! The central fan-out point: every state-changing domain action (like,
//! comment, reply, follow, appointment change, …) calls [`service::notify`],
//! which durably records the notification and pushes it to the recipient's
//! identity channel when connected. Admin-facing operational events go
//! through [`admin::broadcast_admin_event`] into a shared admin inbox.

pub mod admin;
pub mod service;

use serde::{Deserialize, Serialize};

pub use admin::AdminNotificationView;

/// Per-user notification types, triggered by domain actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Reply,
    Mention,
    Follow,
    AppointmentRequest,
    AppointmentConfirmed,
    AppointmentCancelled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Reply => "reply",
            Self::Mention => "mention",
            Self::Follow => "follow",
            Self::AppointmentRequest => "appointment_request",
            Self::AppointmentConfirmed => "appointment_confirmed",
            Self::AppointmentCancelled => "appointment_cancelled",
        }
    }
}

/// Input to [`service::notify`]. Subject references are raw ids; display
/// fields are joined at push/read time.
#[derive(Debug, Clone)]
pub struct NotifyInput {
    pub recipient_id: String,
    pub sender_id: String,
    pub kind: NotificationKind,
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
    pub reply_id: Option<String>,
    pub appointment_id: Option<String>,
    pub message: Option<String>,
    pub is_anonymous: bool,
}

impl NotifyInput {
    pub fn new(recipient_id: &str, sender_id: &str, kind: NotificationKind) -> Self {
        Self {
            recipient_id: recipient_id.to_string(),
            sender_id: sender_id.to_string(),
            kind,
            post_id: None,
            comment_id: None,
            reply_id: None,
            appointment_id: None,
            message: None,
            is_anonymous: false,
        }
    }
}

/// A notification populated for transmission/display. The stored record
/// keeps raw references only; sender name/photo reflect the profile at
/// read time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: String,
    pub recipient_id: String,
    pub sender_id: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub read: bool,
    pub created_at: String,
    pub sender_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_photo: Option<String>,
}

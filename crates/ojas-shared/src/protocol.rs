use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::{MessageType, MessageWithSender, Notification, UserSummary};
use crate::types::UserId;

/// Events sent by a browser session to the relay.
///
/// On the wire every frame is a JSON text message shaped as
/// `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Authenticate the connection with a session token
    Join(JoinPayload),

    /// Persist a message and forward it to the receiver if online
    SendMessage(SendMessagePayload),

    /// Ephemeral typing indicator, never persisted
    TypingStart(TypingPayload),

    TypingStop(TypingPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub receiver_id: String,
}

/// Events pushed by the relay to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The connection is now bound to this user
    Authenticated(AuthenticatedPayload),

    /// A failure caused by this connection's own request
    Error(ErrorPayload),

    /// Acknowledgement to the sender after persistence
    MessageSent(MessagePayload),

    /// Delivery to the receiver's connections
    NewMessage(MessagePayload),

    UserTyping(UserTypingPayload),

    UserStoppedTyping(UserStoppedTypingPayload),

    /// A notification for this user became due
    NewNotification(NotificationPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedPayload {
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub message: MessageWithSender,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub sender_id: UserId,
    pub sender_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserStoppedTypingPayload {
    pub sender_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub notification: Notification,
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated(_) => "authenticated",
            ServerEvent::Error(_) => "error",
            ServerEvent::MessageSent(_) => "message_sent",
            ServerEvent::NewMessage(_) => "new_message",
            ServerEvent::UserTyping(_) => "user_typing",
            ServerEvent::UserStoppedTyping(_) => "user_stopped_typing",
            ServerEvent::NewNotification(_) => "new_notification",
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

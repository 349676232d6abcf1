//! Domain model structs shared by the store, the server and the client.
//!
//! Every struct derives `Serialize` and `Deserialize` with camelCase field
//! names so it can be handed directly to the browser over REST or the relay.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AppointmentId, ConversationId, MessageId, NotificationId, UserId};

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// serde representation is snake_case.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} value: {other}", stringify!($name))),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Patient,
    Practitioner,
    Admin,
}

string_enum!(UserRole {
    Patient => "patient",
    Practitioner => "practitioner",
    Admin => "admin",
});

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

/// The public profile attached to messages, conversations and relay events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub role: UserRole,
}

// ---------------------------------------------------------------------------
// Appointment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

string_enum!(AppointmentStatus {
    Scheduled => "scheduled",
    Confirmed => "confirmed",
    Completed => "completed",
    Cancelled => "cancelled",
});

/// A booked therapy session between a patient and a practitioner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: AppointmentId,
    pub patient_id: UserId,
    pub practitioner_id: UserId,
    /// Therapy or procedure name, e.g. "Abhyanga".
    pub therapy: String,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn involves(&self, user: &UserId) -> bool {
        self.patient_id == *user || self.practitioner_id == *user
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

string_enum!(MessageType {
    Text => "text",
    Image => "image",
    File => "file",
});

/// A single direct message between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub conversation_id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Build an unread message; the conversation id is derived from the pair.
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        content: String,
        message_type: MessageType,
        now: DateTime<Utc>,
    ) -> Self {
        let conversation_id = ConversationId::between(&sender_id, &receiver_id);
        Self {
            id: MessageId::new(),
            sender_id,
            receiver_id,
            content,
            message_type,
            is_read: false,
            conversation_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A message with the sender's profile populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    pub sender: UserSummary,
}

/// Derived summary of one conversation, as seen by one of its participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub last_message: Message,
    pub unread_count: u32,
    pub other_user: UserSummary,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

string_enum!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderPhase {
    Pre,
    Post,
}

string_enum!(ReminderPhase {
    Pre => "pre",
    Post => "post",
});

/// Flat notification type, stored alongside the typed payload for filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    AppointmentScheduled,
    AppointmentUpdated,
    AppointmentReminder,
    ProcedurePrecaution,
    Welcome,
    Message,
}

string_enum!(NotificationType {
    AppointmentScheduled => "appointment_scheduled",
    AppointmentUpdated => "appointment_updated",
    AppointmentReminder => "appointment_reminder",
    ProcedurePrecaution => "procedure_precaution",
    Welcome => "welcome",
    Message => "message",
});

/// What a notification is about, carrying exactly the fields each type needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum NotificationKind {
    AppointmentScheduled {
        appointment_id: AppointmentId,
    },
    AppointmentUpdated {
        appointment_id: AppointmentId,
        status: AppointmentStatus,
    },
    AppointmentReminder {
        appointment_id: AppointmentId,
        phase: ReminderPhase,
    },
    ProcedurePrecaution {
        appointment_id: AppointmentId,
        instructions: String,
    },
    Welcome,
    Message {
        conversation_id: ConversationId,
        sender_id: UserId,
    },
}

impl NotificationKind {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            NotificationKind::AppointmentScheduled { .. } => NotificationType::AppointmentScheduled,
            NotificationKind::AppointmentUpdated { .. } => NotificationType::AppointmentUpdated,
            NotificationKind::AppointmentReminder { .. } => NotificationType::AppointmentReminder,
            NotificationKind::ProcedurePrecaution { .. } => NotificationType::ProcedurePrecaution,
            NotificationKind::Welcome => NotificationType::Welcome,
            NotificationKind::Message { .. } => NotificationType::Message,
        }
    }

    /// The appointment this notification refers to, if any.
    pub fn appointment_id(&self) -> Option<AppointmentId> {
        match self {
            NotificationKind::AppointmentScheduled { appointment_id }
            | NotificationKind::AppointmentUpdated { appointment_id, .. }
            | NotificationKind::AppointmentReminder { appointment_id, .. }
            | NotificationKind::ProcedurePrecaution { appointment_id, .. } => {
                Some(*appointment_id)
            }
            NotificationKind::Welcome | NotificationKind::Message { .. } => None,
        }
    }
}

/// A per-user alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub priority: Priority,
    /// Not visible to the owner before this instant.
    pub scheduled_for: DateTime<Utc>,
    /// When the notification became due and was pushed; `None` while pending.
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Build an unread notification that becomes visible at `scheduled_for`.
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        priority: Priority,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            is_read: false,
            priority,
            scheduled_for,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for <= now
    }
}

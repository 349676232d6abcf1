use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::CONVERSATION_SEPARATOR;
use crate::error::IdError;

// User identity = opaque string, never contains the conversation separator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Fresh identifier for a newly created user (hyphen-less UUIDv4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.contains(CONVERSATION_SEPARATOR) {
            return Err(IdError::ContainsSeparator(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::str::FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identity of the conversation between exactly two users.
///
/// Derived by sorting both user ids and joining them with
/// [`CONVERSATION_SEPARATOR`], so `between(a, b) == between(b, a)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    pub fn between(a: &UserId, b: &UserId) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{first}{CONVERSATION_SEPARATOR}{second}"))
    }

    /// Parse a conversation id received from a client.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let (first, second) = s
            .split_once(CONVERSATION_SEPARATOR)
            .ok_or_else(|| IdError::MalformedConversation(s.to_string()))?;
        let first = UserId::parse(first)
            .map_err(|_| IdError::MalformedConversation(s.to_string()))?;
        let second = UserId::parse(second)
            .map_err(|_| IdError::MalformedConversation(s.to_string()))?;

        let canonical = Self::between(&first, &second);
        if canonical.0 != s {
            return Err(IdError::MalformedConversation(s.to_string()));
        }
        Ok(canonical)
    }

    /// The two participants, in sorted order.
    pub fn participants(&self) -> (UserId, UserId) {
        // Construction guarantees exactly one separator between two valid ids.
        let (a, b) = self
            .0
            .split_once(CONVERSATION_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""));
        (UserId(a.to_string()), UserId(b.to_string()))
    }

    pub fn involves(&self, user: &UserId) -> bool {
        let (a, b) = self.participants();
        a == *user || b == *user
    }

    /// The participant that is not `user`, if `user` takes part at all.
    pub fn other_participant(&self, user: &UserId) -> Option<UserId> {
        let (a, b) = self.participants();
        if a == *user {
            Some(b)
        } else if b == *user {
            Some(a)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ConversationId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a persisted chat message.
    MessageId
);
uuid_id!(
    /// Identifier of a persisted notification.
    NotificationId
);
uuid_id!(
    /// Identifier of an appointment.
    AppointmentId
);
uuid_id!(
    /// Identifier of one live relay connection. Never persisted.
    ConnectionId
);

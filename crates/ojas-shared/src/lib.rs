//! # ojas-shared
//!
//! Types shared by every Ojas crate: identifiers and conversation identity,
//! the clinic data model, the relay wire protocol, REST bodies and signed session tokens.

pub mod api;
pub mod clock;
pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod session;
pub mod types;

pub use error::{IdError, ProtocolError, SessionError};
pub use types::{AppointmentId, ConnectionId, ConversationId, MessageId, NotificationId, UserId};

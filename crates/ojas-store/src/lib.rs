//! # ojas-store
//!
//! Durable storage for the Ojas clinic backend, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for users,
//! appointments, messages and notifications.

pub mod appointments;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod notifications;
pub mod users;

mod codec;
mod error;

pub use appointments::AppointmentChanges;
pub use database::Database;
pub use error::{Result, StoreError};
pub use messages::ConversationRow;

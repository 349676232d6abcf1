//! # ojas-client
//!
//! Client-side state for the Ojas clinic: a REST client for the server and
//! containers that keep the inbox and notification list in sync with relay
//! events. Mutations are applied optimistically and rolled back when the
//! server rejects them.

pub mod api;
pub mod error;
pub mod messaging;
pub mod notifications;
pub mod pending;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ClinicApi, HttpApi};
pub use error::{ClientError, Result};
pub use messaging::{Inbox, MessagingState, Thread};
pub use notifications::{NotificationList, NotificationState};
pub use session::ClientSession;

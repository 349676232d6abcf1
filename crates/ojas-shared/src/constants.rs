/// Application name
pub const APP_NAME: &str = "Ojas";

/// Separator between the two user ids of a conversation id
pub const CONVERSATION_SEPARATOR: char = '_';

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default page size for conversation history
pub const DEFAULT_MESSAGE_PAGE_LIMIT: u32 = 50;

/// Default page size for the notification list
pub const DEFAULT_NOTIFICATION_PAGE_LIMIT: u32 = 20;

/// Maximum message content length in bytes (16 KiB)
pub const MAX_MESSAGE_CONTENT: usize = 16 * 1024;

/// Default lifetime of a signed session token
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24 * 7;

/// Longest accepted session lifetime (ten years)
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365 * 10;

/// Pre-appointment reminders fire this many hours before the start
pub const PRE_REMINDER_OFFSET_HOURS: i64 = 24;

/// Post-appointment reminders fire this many hours after the start
pub const POST_REMINDER_OFFSET_HOURS: i64 = 1;

/// Capacity of each relay connection's outbound event buffer
pub const RELAY_OUTBOUND_CAPACITY: usize = 256;

//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `appointments`, `messages` and
//! `notifications`.
//!
//! Timestamps are RFC-3339 text with a fixed microsecond precision and a
//! `Z` suffix, so lexical order equals chronological order.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    email      TEXT NOT NULL UNIQUE,
    role       TEXT NOT NULL,              -- patient | practitioner | admin
    created_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Appointments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS appointments (
    id               TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    patient_id       TEXT NOT NULL,
    practitioner_id  TEXT NOT NULL,
    therapy          TEXT NOT NULL,
    starts_at        TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    status           TEXT NOT NULL,
    notes            TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,

    FOREIGN KEY (patient_id) REFERENCES users(id),
    FOREIGN KEY (practitioner_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_appointments_patient
    ON appointments(patient_id, starts_at);
CREATE INDEX IF NOT EXISTS idx_appointments_practitioner
    ON appointments(practitioner_id, starts_at);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender_id       TEXT NOT NULL,
    receiver_id     TEXT NOT NULL,
    content         TEXT NOT NULL,
    message_type    TEXT NOT NULL,               -- text | image | file
    is_read         INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    conversation_id TEXT NOT NULL,               -- sorted ids joined by '_'
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,

    FOREIGN KEY (sender_id) REFERENCES users(id),
    FOREIGN KEY (receiver_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_receiver_unread
    ON messages(receiver_id, is_read);
CREATE INDEX IF NOT EXISTS idx_messages_sender
    ON messages(sender_id);

-- ----------------------------------------------------------------
-- Notifications
-- ----------------------------------------------------------------
-- No FK on appointment_id: notifications outlive their appointment.
CREATE TABLE IF NOT EXISTS notifications (
    id             TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    user_id        TEXT NOT NULL,
    type           TEXT NOT NULL,
    appointment_id TEXT,
    title          TEXT NOT NULL,
    message        TEXT NOT NULL,
    kind           TEXT NOT NULL,                -- JSON NotificationKind
    is_read        INTEGER NOT NULL DEFAULT 0,
    priority       TEXT NOT NULL,
    scheduled_for  TEXT NOT NULL,
    delivered_at   TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_notifications_user_read_ts
    ON notifications(user_id, is_read, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_notifications_pending
    ON notifications(delivered_at, scheduled_for);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

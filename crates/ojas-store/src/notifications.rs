//! Persistence for per-user notifications.
//!
//! A notification is visible to its owner only once it is due
//! (`scheduled_for <= now`). `delivered_at` records when the server pushed
//! it; rows that are due but undelivered are picked up by the sweep.

use chrono::{DateTime, Utc};
use rusqlite::params;

use ojas_shared::models::{Notification, NotificationKind, NotificationType};
use ojas_shared::{AppointmentId, NotificationId, UserId};

use crate::codec::{conversion_error, opt_ts_col, parse_col, ts, ts_col};
use crate::database::Database;
use crate::error::{not_found, Result, StoreError};

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, message, is_read, priority,
    scheduled_for, delivered_at, created_at, updated_at";

const INSERT_SQL: &str = "INSERT INTO notifications (id, user_id, type, appointment_id, title,
        message, kind, is_read, priority, scheduled_for, delivered_at, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

impl Database {
    /// Insert several notifications atomically: either all rows land or none.
    pub fn insert_notifications(&self, notifications: &[Notification]) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        for notification in notifications {
            insert_with(&tx, notification)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_notification(&self, id: NotificationId) -> Result<Notification> {
        self.conn()
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                params![id.to_string()],
                row_to_notification,
            )
            .map_err(not_found)
    }

    /// One page of the user's due notifications, most recently due first.
    pub fn list_notifications(
        &self,
        user: &UserId,
        unread_only: bool,
        limit: u32,
        offset: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS}
             FROM notifications
             WHERE user_id = ?1
               AND scheduled_for <= ?2
               AND (?3 = 0 OR is_read = 0)
             ORDER BY scheduled_for DESC, rowid DESC
             LIMIT ?4 OFFSET ?5"
        ))?;

        let rows = stmt.query_map(
            params![user.as_str(), ts(&now), unread_only, limit, offset],
            row_to_notification,
        )?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Number of the user's due notifications (optionally unread only).
    pub fn count_notifications(
        &self,
        user: &UserId,
        unread_only: bool,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications
             WHERE user_id = ?1
               AND scheduled_for <= ?2
               AND (?3 = 0 OR is_read = 0)",
            params![user.as_str(), ts(&now), unread_only],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Mark one notification read, but only if `owner` owns it.
    ///
    /// Someone else's notification is reported as [`StoreError::NotFound`]
    /// so that its existence does not leak.
    pub fn mark_notification_read(
        &self,
        id: NotificationId,
        owner: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Notification> {
        self.conn().execute(
            "UPDATE notifications SET is_read = 1, updated_at = ?3
             WHERE id = ?1 AND user_id = ?2 AND is_read = 0",
            params![id.to_string(), owner.as_str(), ts(&now)],
        )?;

        let notification = self.get_notification(id)?;
        if notification.user_id != *owner {
            return Err(StoreError::NotFound);
        }
        Ok(notification)
    }

    /// Mark all of the owner's due notifications read. Returns how many changed.
    pub fn mark_all_notifications_read(&self, owner: &UserId, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_read = 1, updated_at = ?2
             WHERE user_id = ?1 AND is_read = 0 AND scheduled_for <= ?2",
            params![owner.as_str(), ts(&now)],
        )?;
        Ok(affected)
    }

    /// Due notifications that have not been delivered yet, oldest due first.
    pub fn pending_due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS}
             FROM notifications
             WHERE delivered_at IS NULL AND scheduled_for <= ?1
             ORDER BY scheduled_for ASC, rowid ASC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![ts(&now), limit], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Stamp `delivered_at`. Returns `false` if it was already delivered.
    pub fn mark_notification_delivered(
        &self,
        id: NotificationId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notifications SET delivered_at = ?2
             WHERE id = ?1 AND delivered_at IS NULL",
            params![id.to_string(), ts(&now)],
        )?;
        Ok(affected > 0)
    }

    /// Undelivered reminders queued for an appointment.
    pub fn pending_appointment_reminders(
        &self,
        appointment_id: AppointmentId,
    ) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS}
             FROM notifications
             WHERE appointment_id = ?1 AND type = ?2 AND delivered_at IS NULL
             ORDER BY scheduled_for ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(
            params![
                appointment_id.to_string(),
                NotificationType::AppointmentReminder.as_str()
            ],
            row_to_notification,
        )?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Drop the undelivered reminders of an appointment. Returns how many.
    pub fn delete_pending_appointment_reminders(&self, appointment_id: AppointmentId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM notifications
             WHERE appointment_id = ?1 AND type = ?2 AND delivered_at IS NULL",
            params![
                appointment_id.to_string(),
                NotificationType::AppointmentReminder.as_str()
            ],
        )?;
        Ok(affected)
    }
}

fn insert_with(conn: &rusqlite::Connection, n: &Notification) -> Result<()> {
    let kind_json = serde_json::to_string(&n.kind)?;
    conn.execute(
        INSERT_SQL,
        params![
            n.id.to_string(),
            n.user_id.as_str(),
            n.kind.notification_type().as_str(),
            n.kind.appointment_id().map(|id| id.to_string()),
            n.title,
            n.message,
            kind_json,
            n.is_read,
            n.priority.as_str(),
            ts(&n.scheduled_for),
            n.delivered_at.as_ref().map(ts),
            ts(&n.created_at),
            ts(&n.updated_at),
        ],
    )?;
    Ok(())
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let kind_json: String = row.get(2)?;
    let kind: NotificationKind =
        serde_json::from_str(&kind_json).map_err(|e| conversion_error(2, e))?;

    Ok(Notification {
        id: parse_col(row, 0)?,
        user_id: parse_col(row, 1)?,
        kind,
        title: row.get(3)?,
        message: row.get(4)?,
        is_read: row.get(5)?,
        priority: parse_col(row, 6)?,
        scheduled_for: ts_col(row, 7)?,
        delivered_at: opt_ts_col(row, 8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

//! Persistence and queries for direct messages.
//!
//! Conversations are never stored: [`Database::get_user_conversations`]
//! recomputes the per-conversation summary from the `messages` table on
//! every call.

use chrono::{DateTime, Utc};
use rusqlite::params;

use ojas_shared::models::Message;
use ojas_shared::{ConversationId, MessageId, UserId};

use crate::codec::{parse_col, ts, ts_col};
use crate::database::Database;
use crate::error::{not_found, Result};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, message_type, is_read,
    conversation_id, created_at, updated_at";

/// Latest message of one conversation plus the querying user's unread count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub last_message: Message,
    pub unread_count: u32,
}

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, message_type, is_read,
                 conversation_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.sender_id.as_str(),
                message.receiver_id.as_str(),
                message.content,
                message.message_type.as_str(),
                message.is_read,
                message.conversation_id.as_str(),
                ts(&message.created_at),
                ts(&message.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// One page of a conversation, newest first. Messages with identical
    /// timestamps come back in reverse insertion order.
    pub fn get_conversation_messages(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![conversation_id.as_str(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn count_conversation_messages(&self, conversation_id: &ConversationId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every conversation `user` takes part in, most recently active first.
    pub fn get_user_conversations(&self, user: &UserId) -> Result<Vec<ConversationRow>> {
        let mut stmt = self.conn().prepare(
            "WITH mine AS (
                 SELECT rowid AS rid, *
                 FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
             ),
             ranked AS (
                 SELECT mine.*,
                        ROW_NUMBER() OVER (
                            PARTITION BY conversation_id
                            ORDER BY created_at DESC, rid DESC
                        ) AS pos,
                        SUM(CASE WHEN receiver_id = ?1 AND is_read = 0 THEN 1 ELSE 0 END)
                            OVER (PARTITION BY conversation_id) AS unread
                 FROM mine
             )
             SELECT id, sender_id, receiver_id, content, message_type, is_read,
                    conversation_id, created_at, updated_at, unread
             FROM ranked
             WHERE pos = 1
             ORDER BY created_at DESC, rid DESC",
        )?;

        let rows = stmt.query_map(params![user.as_str()], |row| {
            Ok(ConversationRow {
                last_message: row_to_message(row)?,
                unread_count: row.get(9)?,
            })
        })?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// Flip `is_read`. Already-read messages are left untouched.
    pub fn mark_message_read(&self, id: MessageId, now: DateTime<Utc>) -> Result<Message> {
        self.conn().execute(
            "UPDATE messages SET is_read = 1, updated_at = ?2
             WHERE id = ?1 AND is_read = 0",
            params![id.to_string(), ts(&now)],
        )?;
        // Zero rows touched means already read or missing; the fetch decides.
        self.get_message(id)
    }

    /// Mark every unread message addressed to `receiver` in a conversation.
    pub fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
        receiver: &UserId,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_read = 1, updated_at = ?3
             WHERE conversation_id = ?1 AND receiver_id = ?2 AND is_read = 0",
            params![conversation_id.as_str(), receiver.as_str(), ts(&now)],
        )?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: parse_col(row, 0)?,
        sender_id: parse_col(row, 1)?,
        receiver_id: parse_col(row, 2)?,
        content: row.get(3)?,
        message_type: parse_col(row, 4)?,
        is_read: row.get(5)?,
        conversation_id: parse_col(row, 6)?,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use chrono::Duration;
    use ojas_shared::clock;
    use ojas_shared::models::{MessageType, UserRole};

    use crate::users::tests::make_user;

    fn send(db: &Database, from: &UserId, to: &UserId, text: &str, at: DateTime<Utc>) -> Message {
        let msg = Message::new(from.clone(), to.clone(), text.into(), MessageType::Text, at);
        db.insert_message(&msg).unwrap();
        msg
    }

    #[test]
    fn conversation_messages_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let a = make_user(&db, "u1", UserRole::Patient).id;
        let b = make_user(&db, "u2", UserRole::Practitioner).id;
        let t0 = clock::now();

        let first = send(&db, &a, &b, "hello", t0);
        let second = send(&db, &b, &a, "namaste", t0 + Duration::seconds(1));

        let conv = ConversationId::between(&a, &b);
        let page = db.get_conversation_messages(&conv, 50, 0).unwrap();
        assert_eq!(page, vec![second.clone(), first.clone()]);

        // Re-fetching does not duplicate.
        assert_eq!(db.get_conversation_messages(&conv, 50, 0).unwrap().len(), 2);
        assert_eq!(db.count_conversation_messages(&conv).unwrap(), 2);

        let second_page = db.get_conversation_messages(&conv, 1, 1).unwrap();
        assert_eq!(second_page, vec![first]);
    }

    #[test]
    fn same_timestamp_keeps_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let a = make_user(&db, "u1", UserRole::Patient).id;
        let b = make_user(&db, "u2", UserRole::Practitioner).id;
        let t0 = clock::now();

        let first = send(&db, &a, &b, "one", t0);
        let second = send(&db, &a, &b, "two", t0);

        let conv = ConversationId::between(&a, &b);
        let page = db.get_conversation_messages(&conv, 10, 0).unwrap();
        assert_eq!(page[0].id, second.id);
        assert_eq!(page[1].id, first.id);
    }

    #[test]
    fn conversations_sorted_by_recency_with_unread_counts() {
        let db = Database::open_in_memory().unwrap();
        let me = make_user(&db, "u1", UserRole::Practitioner).id;
        let p2 = make_user(&db, "u2", UserRole::Patient).id;
        let p3 = make_user(&db, "u3", UserRole::Patient).id;
        let t0 = clock::now();

        send(&db, &p2, &me, "a", t0);
        send(&db, &p2, &me, "b", t0 + Duration::seconds(1));
        send(&db, &me, &p3, "c", t0 + Duration::seconds(2));
        let latest = send(&db, &p3, &me, "d", t0 + Duration::seconds(3));

        let convs = db.get_user_conversations(&me).unwrap();
        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].last_message, latest);
        assert_eq!(convs[0].unread_count, 1);
        assert_eq!(convs[1].last_message.content, "b");
        assert_eq!(convs[1].unread_count, 2);

        // From the other side, nothing is unread for u3 except what they received.
        let theirs = db.get_user_conversations(&p3).unwrap();
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].unread_count, 1);
    }

    #[test]
    fn unread_count_matches_receiver_unread_messages() {
        let db = Database::open_in_memory().unwrap();
        let a = make_user(&db, "u1", UserRole::Patient).id;
        let b = make_user(&db, "u2", UserRole::Practitioner).id;
        let t0 = clock::now();

        let m1 = send(&db, &a, &b, "1", t0);
        send(&db, &a, &b, "2", t0 + Duration::seconds(1));
        send(&db, &b, &a, "3", t0 + Duration::seconds(2));
        db.mark_message_read(m1.id, clock::now()).unwrap();

        let convs = db.get_user_conversations(&b).unwrap();
        assert_eq!(convs[0].unread_count, 1);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = make_user(&db, "u1", UserRole::Patient).id;
        let b = make_user(&db, "u2", UserRole::Practitioner).id;
        let msg = send(&db, &a, &b, "hello", clock::now());

        let once = db.mark_message_read(msg.id, clock::now()).unwrap();
        assert!(once.is_read);
        let twice = db.mark_message_read(msg.id, clock::now()).unwrap();
        assert!(twice.is_read);
        assert_eq!(once.updated_at, twice.updated_at);
    }

    #[test]
    fn mark_read_missing_message() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.mark_message_read(MessageId::new(), clock::now()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn mark_conversation_read_only_touches_received() {
        let db = Database::open_in_memory().unwrap();
        let a = make_user(&db, "u1", UserRole::Patient).id;
        let b = make_user(&db, "u2", UserRole::Practitioner).id;
        let t0 = clock::now();
        send(&db, &a, &b, "1", t0);
        send(&db, &b, &a, "2", t0 + Duration::seconds(1));

        let conv = ConversationId::between(&a, &b);
        assert_eq!(db.mark_conversation_read(&conv, &b, clock::now()).unwrap(), 1);
        assert_eq!(db.get_user_conversations(&b).unwrap()[0].unread_count, 0);
        assert_eq!(db.get_user_conversations(&a).unwrap()[0].unread_count, 1);
    }
}

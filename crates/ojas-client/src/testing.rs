//! In-memory [`ClinicApi`] for container tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use ojas_shared::api::{MessagePage, NotificationPage, Pagination, SendMessageRequest};
use ojas_shared::clock;
use ojas_shared::models::{
    ConversationSummary, Message, MessageType, MessageWithSender, Notification, NotificationKind,
    Priority, User, UserRole, UserSummary,
};
use ojas_shared::{ConversationId, MessageId, NotificationId, UserId};

use crate::api::ClinicApi;
use crate::error::{ClientError, Result};

pub(crate) fn user(id: &str, name: &str) -> UserSummary {
    UserSummary {
        id: UserId::parse(id).unwrap(),
        name: name.into(),
        role: UserRole::Patient,
    }
}

pub(crate) fn me() -> UserSummary {
    user("me", "Asha")
}

pub(crate) fn notification(title: &str) -> Notification {
    let now = clock::now();
    Notification::new(
        me().id,
        NotificationKind::Welcome,
        title,
        "body",
        Priority::Low,
        now,
        now,
    )
}

/// A message from `from` to `to`, `secs` seconds after a fixed base time.
pub(crate) fn message(from: &UserSummary, to: &UserSummary, text: &str, secs: i64) -> MessageWithSender {
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
    MessageWithSender {
        message: Message::new(
            from.id.clone(),
            to.id.clone(),
            text.into(),
            MessageType::Text,
            base + Duration::seconds(secs),
        ),
        sender: from.clone(),
    }
}

pub(crate) fn summary_of(last: &MessageWithSender, other: &UserSummary, unread: u32) -> ConversationSummary {
    ConversationSummary {
        conversation_id: last.message.conversation_id.clone(),
        last_message: last.message.clone(),
        unread_count: unread,
        other_user: other.clone(),
    }
}

#[derive(Default)]
struct Inner {
    conversations: Vec<ConversationSummary>,
    threads: HashMap<ConversationId, Vec<MessageWithSender>>,
    notifications: Vec<Notification>,
    fail_next: bool,
    fail_call: Option<&'static str>,
    calls: HashMap<&'static str, usize>,
}

pub(crate) struct FakeApi {
    me: UserSummary,
    inner: Mutex<Inner>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            me: me(),
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl FakeApi {
    pub(crate) fn set_notifications(&self, notifications: Vec<Notification>) {
        self.inner.lock().unwrap().notifications = notifications;
    }

    pub(crate) fn set_conversations(&self, conversations: Vec<ConversationSummary>) {
        self.inner.lock().unwrap().conversations = conversations;
    }

    /// Chronological messages for one conversation.
    pub(crate) fn set_thread(&self, conversation: ConversationId, messages: Vec<MessageWithSender>) {
        self.inner.lock().unwrap().threads.insert(conversation, messages);
    }

    /// Make the next call fail with a 500.
    pub(crate) fn fail_next(&self) {
        self.inner.lock().unwrap().fail_next = true;
    }

    /// Make the next call to `name` fail with a 500.
    pub(crate) fn fail_call(&self, name: &'static str) {
        self.inner.lock().unwrap().fail_call = Some(name);
    }

    pub(crate) fn calls(&self, name: &str) -> usize {
        self.inner.lock().unwrap().calls.get(name).copied().unwrap_or(0)
    }

    fn enter(&self, name: &'static str) -> Result<std::sync::MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock().unwrap();
        *inner.calls.entry(name).or_default() += 1;
        let named = inner.fail_call == Some(name);
        if inner.fail_next || named {
            inner.fail_next = false;
            if named {
                inner.fail_call = None;
            }
            return Err(ClientError::Status {
                status: 500,
                message: "Internal server error".into(),
            });
        }
        Ok(inner)
    }
}

fn not_found(what: &str) -> ClientError {
    ClientError::Status {
        status: 404,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl ClinicApi for FakeApi {
    async fn current_user(&self) -> Result<User> {
        self.enter("current_user")?;
        Ok(User {
            id: self.me.id.clone(),
            name: self.me.name.clone(),
            email: "me@ojas.test".into(),
            role: self.me.role,
            created_at: clock::now(),
        })
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.enter("conversations")?.conversations.clone())
    }

    async fn conversation_messages(
        &self,
        conversation_id: &ConversationId,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage> {
        let inner = self.enter("conversation_messages")?;
        let all = inner.threads.get(conversation_id).cloned().unwrap_or_default();
        let total = all.len();
        // Newest page first, each page chronological.
        let skip = Pagination::offset(page, limit) as usize;
        let end = total.saturating_sub(skip);
        let start = end.saturating_sub(limit as usize);
        Ok(MessagePage {
            messages: all[start..end].to_vec(),
            pagination: Pagination::new(page, limit, total as u64),
        })
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<MessageWithSender> {
        self.enter("send_message")?;
        let receiver = request
            .receiver_id
            .as_deref()
            .map(UserId::parse)
            .transpose()
            .map_err(|e| ClientError::Decode(e.to_string()))?
            .ok_or_else(|| not_found("Receiver"))?;
        Ok(MessageWithSender {
            message: Message::new(
                self.me.id.clone(),
                receiver,
                request.content.clone().unwrap_or_default(),
                request.message_type,
                clock::now(),
            ),
            sender: self.me.clone(),
        })
    }

    async fn mark_message_read(&self, id: MessageId) -> Result<Message> {
        let mut inner = self.enter("mark_message_read")?;
        for thread in inner.threads.values_mut() {
            if let Some(m) = thread.iter_mut().find(|m| m.message.id == id) {
                m.message.is_read = true;
                return Ok(m.message.clone());
            }
        }
        Err(not_found("Message"))
    }

    async fn mark_conversation_read(&self, conversation_id: &ConversationId) -> Result<u64> {
        let mut inner = self.enter("mark_conversation_read")?;
        let me = self.me.id.clone();
        let mut updated = 0;
        if let Some(thread) = inner.threads.get_mut(conversation_id) {
            for m in thread.iter_mut() {
                if m.message.receiver_id == me && !m.message.is_read {
                    m.message.is_read = true;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn notifications(
        &self,
        page: u32,
        limit: u32,
        unread_only: bool,
    ) -> Result<NotificationPage> {
        let inner = self.enter("notifications")?;
        let visible: Vec<_> = inner
            .notifications
            .iter()
            .filter(|n| !unread_only || !n.is_read)
            .cloned()
            .collect();
        let unread_count = inner.notifications.iter().filter(|n| !n.is_read).count() as u64;
        let total = visible.len() as u64;
        let notifications = visible
            .into_iter()
            .skip(Pagination::offset(page, limit) as usize)
            .take(limit as usize)
            .collect();
        Ok(NotificationPage {
            notifications,
            pagination: Pagination::new(page, limit, total),
            unread_count,
        })
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<Notification> {
        let mut inner = self.enter("mark_notification_read")?;
        let n = inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| not_found("Notification"))?;
        n.is_read = true;
        Ok(n.clone())
    }

    async fn mark_all_notifications_read(&self) -> Result<u64> {
        let mut inner = self.enter("mark_all_notifications_read")?;
        let mut updated = 0;
        for n in inner.notifications.iter_mut().filter(|n| !n.is_read) {
            n.is_read = true;
            updated += 1;
        }
        Ok(updated)
    }
}

//! Conversation list and open thread, merged from REST pages and relay events.
//!
//! Every message is keyed by id, so the same message arriving through the
//! send response, a `message_sent` echo and a later page reload is merged
//! once. Unread counts only move for messages seen for the first time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use ojas_shared::api::{Pagination, SendMessageRequest};
use ojas_shared::constants::DEFAULT_MESSAGE_PAGE_LIMIT;
use ojas_shared::models::{ConversationSummary, MessageType, MessageWithSender, UserSummary};
use ojas_shared::protocol::ServerEvent;
use ojas_shared::{ConversationId, MessageId, UserId};

use crate::api::ClinicApi;
use crate::error::Result;
use crate::pending::{run_optimistic, Command};

/// The conversation currently on screen, oldest message first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub conversation_id: ConversationId,
    pub messages: Vec<MessageWithSender>,
    pub pagination: Option<Pagination>,
}

impl Thread {
    /// Insert or replace by id, keeping chronological order.
    fn upsert(&mut self, msg: &MessageWithSender) {
        if let Some(existing) = self
            .messages
            .iter_mut()
            .find(|m| m.message.id == msg.message.id)
        {
            *existing = msg.clone();
            return;
        }
        let at = self
            .messages
            .partition_point(|m| m.message.created_at <= msg.message.created_at);
        self.messages.insert(at, msg.clone());
    }
}

/// Conversations (most recent first) plus the open thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inbox {
    pub conversations: Vec<ConversationSummary>,
    pub active: Option<Thread>,
}

impl Inbox {
    fn summary_mut(&mut self, id: &ConversationId) -> Option<&mut ConversationSummary> {
        self.conversations
            .iter_mut()
            .find(|c| c.conversation_id == *id)
    }

    fn active_mut(&mut self, id: &ConversationId) -> Option<&mut Thread> {
        self.active
            .as_mut()
            .filter(|thread| thread.conversation_id == *id)
    }

    fn sort(&mut self) {
        self.conversations
            .sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
    }
}

/// Optimistically clear a conversation's unread state for `me`.
struct MarkConversationRead {
    me: UserId,
    conversation_id: ConversationId,
    unread_before: Option<u32>,
    flipped: Vec<MessageId>,
}

impl Command<Inbox> for MarkConversationRead {
    fn name(&self) -> &'static str {
        "mark_conversation_read"
    }

    fn apply(&mut self, inbox: &mut Inbox) {
        if let Some(summary) = inbox.summary_mut(&self.conversation_id) {
            self.unread_before = Some(summary.unread_count);
            summary.unread_count = 0;
            if summary.last_message.receiver_id == self.me {
                summary.last_message.is_read = true;
            }
        }
        if let Some(thread) = inbox.active_mut(&self.conversation_id) {
            for m in thread.messages.iter_mut() {
                if m.message.receiver_id == self.me && !m.message.is_read {
                    m.message.is_read = true;
                    self.flipped.push(m.message.id);
                }
            }
        }
    }

    fn undo(&mut self, inbox: &mut Inbox) {
        let me = self.me.clone();
        if let Some(thread) = inbox.active_mut(&self.conversation_id) {
            for m in thread.messages.iter_mut() {
                if self.flipped.contains(&m.message.id) {
                    m.message.is_read = false;
                }
            }
        }
        if let Some(unread) = self.unread_before.take() {
            if let Some(summary) = inbox.summary_mut(&self.conversation_id) {
                summary.unread_count = unread;
                if unread > 0 && summary.last_message.receiver_id == me {
                    summary.last_message.is_read = false;
                }
            }
        }
        self.flipped.clear();
    }
}

/// Optimistically flag one received message in the open thread read.
struct MarkMessageRead {
    me: UserId,
    id: MessageId,
    conversation_id: Option<ConversationId>,
}

impl Command<Inbox> for MarkMessageRead {
    fn name(&self) -> &'static str {
        "mark_message_read"
    }

    fn apply(&mut self, inbox: &mut Inbox) {
        let Some(thread) = inbox.active.as_mut() else {
            return;
        };
        let Some(m) = thread
            .messages
            .iter_mut()
            .find(|m| m.message.id == self.id && m.message.receiver_id == self.me)
        else {
            return;
        };
        if m.message.is_read {
            return;
        }
        m.message.is_read = true;
        let conversation_id = thread.conversation_id.clone();
        if let Some(summary) = inbox.summary_mut(&conversation_id) {
            summary.unread_count = summary.unread_count.saturating_sub(1);
            if summary.last_message.id == self.id {
                summary.last_message.is_read = true;
            }
        }
        self.conversation_id = Some(conversation_id);
    }

    fn undo(&mut self, inbox: &mut Inbox) {
        let Some(conversation_id) = self.conversation_id.take() else {
            return;
        };
        if let Some(thread) = inbox.active_mut(&conversation_id) {
            if let Some(m) = thread.messages.iter_mut().find(|m| m.message.id == self.id) {
                m.message.is_read = false;
            }
        }
        if let Some(summary) = inbox.summary_mut(&conversation_id) {
            summary.unread_count += 1;
            if summary.last_message.id == self.id {
                summary.last_message.is_read = false;
            }
        }
    }
}

pub struct MessagingState<A: ClinicApi> {
    api: Arc<A>,
    me: UserSummary,
    inbox: Inbox,
    profiles: HashMap<UserId, UserSummary>,
    seen: HashSet<MessageId>,
    typing: HashSet<UserId>,
    needs_reload: bool,
}

impl<A: ClinicApi> MessagingState<A> {
    pub fn new(api: Arc<A>, me: UserSummary) -> Self {
        Self {
            api,
            me,
            inbox: Inbox::default(),
            profiles: HashMap::new(),
            seen: HashSet::new(),
            typing: HashSet::new(),
            needs_reload: false,
        }
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.inbox.conversations
    }

    pub fn active_thread(&self) -> Option<&Thread> {
        self.inbox.active.as_ref()
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub fn total_unread(&self) -> u32 {
        self.inbox.conversations.iter().map(|c| c.unread_count).sum()
    }

    pub fn is_typing(&self, user: &UserId) -> bool {
        self.typing.contains(user)
    }

    /// Set when an event arrived for a conversation whose other participant
    /// is unknown locally; call [`load`](Self::load) to pick it up.
    pub fn needs_reload(&self) -> bool {
        self.needs_reload
    }

    /// Replace the conversation list with the server's.
    pub async fn load(&mut self) -> Result<()> {
        let conversations = self.api.conversations().await?;
        for c in &conversations {
            self.profiles
                .insert(c.other_user.id.clone(), c.other_user.clone());
            self.seen.insert(c.last_message.id);
        }
        self.inbox.conversations = conversations;
        self.inbox.sort();
        self.needs_reload = false;
        Ok(())
    }

    /// Show the newest page of `conversation_id` and mark it read.
    pub async fn open(&mut self, conversation_id: &ConversationId) -> Result<()> {
        let page = self
            .api
            .conversation_messages(conversation_id, 1, DEFAULT_MESSAGE_PAGE_LIMIT)
            .await?;
        for m in &page.messages {
            self.remember(m);
        }
        self.inbox.active = Some(Thread {
            conversation_id: conversation_id.clone(),
            messages: page.messages,
            pagination: Some(page.pagination),
        });

        let command = MarkConversationRead {
            me: self.me.id.clone(),
            conversation_id: conversation_id.clone(),
            unread_before: None,
            flipped: Vec::new(),
        };
        let api = Arc::clone(&self.api);
        let id = conversation_id.clone();
        run_optimistic(&mut self.inbox, command, async move {
            api.mark_conversation_read(&id).await
        })
        .await?;
        Ok(())
    }

    /// Prepend the next older page of the open thread.
    /// Returns `false` when there is no thread or nothing older.
    pub async fn load_older(&mut self) -> Result<bool> {
        let Some(thread) = self.inbox.active.as_ref() else {
            return Ok(false);
        };
        let Some(current) = thread.pagination else {
            return Ok(false);
        };
        if u64::from(current.page) >= current.pages {
            return Ok(false);
        }
        let conversation_id = thread.conversation_id.clone();

        let page = self
            .api
            .conversation_messages(&conversation_id, current.page + 1, current.limit)
            .await?;
        for m in &page.messages {
            self.remember(m);
        }
        if let Some(thread) = self.inbox.active_mut(&conversation_id) {
            for m in &page.messages {
                thread.upsert(m);
            }
            thread.pagination = Some(page.pagination);
        }
        Ok(true)
    }

    /// Mark a single received message read, e.g. as it scrolls into view.
    pub async fn mark_read(&mut self, id: MessageId) -> Result<()> {
        let command = MarkMessageRead {
            me: self.me.id.clone(),
            id,
            conversation_id: None,
        };
        let api = Arc::clone(&self.api);
        run_optimistic(&mut self.inbox, command, async move {
            api.mark_message_read(id).await
        })
        .await?;
        Ok(())
    }

    pub async fn send(
        &mut self,
        receiver: &UserSummary,
        content: &str,
        message_type: MessageType,
    ) -> Result<MessageWithSender> {
        self.profiles
            .entry(receiver.id.clone())
            .or_insert_with(|| receiver.clone());
        let request = SendMessageRequest {
            receiver_id: Some(receiver.id.to_string()),
            content: Some(content.to_string()),
            message_type,
        };
        let sent = self.api.send_message(&request).await?;
        self.merge(&sent);
        Ok(sent)
    }

    /// Merge a relay event. Returns `true` if it changed anything.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::MessageSent(payload) => self.merge(&payload.message),
            ServerEvent::NewMessage(payload) => {
                let stopped = self.typing.remove(&payload.message.sender.id);
                self.merge(&payload.message) || stopped
            }
            ServerEvent::UserTyping(payload) => self.typing.insert(payload.sender_id.clone()),
            ServerEvent::UserStoppedTyping(payload) => self.typing.remove(&payload.sender_id),
            _ => false,
        }
    }

    fn remember(&mut self, msg: &MessageWithSender) {
        self.seen.insert(msg.message.id);
        if msg.sender.id != self.me.id {
            self.profiles
                .insert(msg.sender.id.clone(), msg.sender.clone());
        }
    }

    /// Returns `true` the first time a message id is merged.
    fn merge(&mut self, msg: &MessageWithSender) -> bool {
        let first_time = self.seen.insert(msg.message.id);
        if msg.sender.id != self.me.id {
            self.profiles
                .insert(msg.sender.id.clone(), msg.sender.clone());
        }

        let message = &msg.message;
        let incoming = message.receiver_id == self.me.id;
        let counts_unread = first_time && incoming && !message.is_read;

        if let Some(thread) = self.inbox.active_mut(&message.conversation_id) {
            thread.upsert(msg);
        }

        match self.inbox.summary_mut(&message.conversation_id) {
            Some(summary) => {
                if summary.last_message.id == message.id
                    || message.created_at >= summary.last_message.created_at
                {
                    summary.last_message = message.clone();
                }
                if counts_unread {
                    summary.unread_count += 1;
                }
            }
            None => {
                let other = if incoming {
                    &message.sender_id
                } else {
                    &message.receiver_id
                };
                match self.profiles.get(other) {
                    Some(other_user) => {
                        let summary = ConversationSummary {
                            conversation_id: message.conversation_id.clone(),
                            last_message: message.clone(),
                            unread_count: u32::from(counts_unread),
                            other_user: other_user.clone(),
                        };
                        self.inbox.conversations.push(summary);
                    }
                    None => {
                        debug!(conversation = %message.conversation_id, "Message for unknown conversation");
                        self.needs_reload = true;
                    }
                }
            }
        }

        self.inbox.sort();
        first_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{me, message, summary_of, user, FakeApi};
    use ojas_shared::protocol::{MessagePayload, UserStoppedTypingPayload, UserTypingPayload};

    fn new_message(msg: &MessageWithSender) -> ServerEvent {
        ServerEvent::NewMessage(MessagePayload {
            message: msg.clone(),
        })
    }

    #[tokio::test]
    async fn test_incoming_message_counts_once_and_reorders() {
        let api = Arc::new(FakeApi::default());
        let ravi = user("ravi", "Ravi");
        let mira = user("mira", "Mira");
        let from_ravi = message(&ravi, &me(), "hello", 0);
        let from_mira = message(&mira, &me(), "namaste", 10);
        api.set_conversations(vec![
            summary_of(&from_mira, &mira, 0),
            summary_of(&from_ravi, &ravi, 1),
        ]);

        let mut state = MessagingState::new(api.clone(), me());
        state.load().await.unwrap();
        assert_eq!(state.conversations()[0].other_user.id, mira.id);
        assert_eq!(state.total_unread(), 1);

        let again = message(&ravi, &me(), "are you there?", 20);
        assert!(state.apply(&new_message(&again)));
        assert!(!state.apply(&new_message(&again)));

        let top = &state.conversations()[0];
        assert_eq!(top.other_user.id, ravi.id);
        assert_eq!(top.unread_count, 2);
        assert_eq!(top.last_message.id, again.message.id);

        // The last message from load was already counted by the server.
        assert!(!state.apply(&new_message(&from_ravi)));
        assert_eq!(state.conversations()[0].unread_count, 2);
    }

    #[tokio::test]
    async fn test_open_thread_merges_in_order_and_marks_read() {
        let api = Arc::new(FakeApi::default());
        let ravi = user("ravi", "Ravi");
        let first = message(&ravi, &me(), "one", 0);
        let third = message(&ravi, &me(), "three", 30);
        let conv = first.message.conversation_id.clone();
        api.set_thread(conv.clone(), vec![first.clone(), third.clone()]);
        api.set_conversations(vec![summary_of(&third, &ravi, 2)]);

        let mut state = MessagingState::new(api.clone(), me());
        state.load().await.unwrap();
        state.open(&conv).await.unwrap();

        assert_eq!(api.calls("mark_conversation_read"), 1);
        assert_eq!(state.total_unread(), 0);
        let thread = state.active_thread().unwrap();
        assert!(thread.messages.iter().all(|m| m.message.is_read));

        let second = message(&me(), &ravi, "two", 15);
        assert!(state.apply(&ServerEvent::MessageSent(MessagePayload {
            message: second.clone(),
        })));
        let contents: Vec<_> = state
            .active_thread()
            .unwrap()
            .messages
            .iter()
            .map(|m| m.message.content.as_str())
            .collect();
        assert_eq!(contents, ["one", "two", "three"]);
        // Outgoing messages never count as unread.
        assert_eq!(state.total_unread(), 0);
        // An older message does not replace the preview.
        assert_eq!(state.conversations()[0].last_message.id, third.message.id);
    }

    #[tokio::test]
    async fn test_open_rolls_back_when_mark_read_fails() {
        let api = Arc::new(FakeApi::default());
        let ravi = user("ravi", "Ravi");
        let first = message(&ravi, &me(), "one", 0);
        let conv = first.message.conversation_id.clone();
        api.set_thread(conv.clone(), vec![first.clone()]);
        api.set_conversations(vec![summary_of(&first, &ravi, 1)]);

        let mut state = MessagingState::new(api.clone(), me());
        state.load().await.unwrap();
        let before = state.inbox().conversations.clone();

        api.fail_call("mark_conversation_read");
        assert!(state.open(&conv).await.is_err());

        // The thread is shown but its unread state is restored.
        assert_eq!(state.inbox().conversations, before);
        assert_eq!(state.total_unread(), 1);
        let thread = state.active_thread().unwrap();
        assert_eq!(thread.messages.len(), 1);
        assert!(!thread.messages[0].message.is_read);

        state.open(&conv).await.unwrap();
        assert_eq!(state.total_unread(), 0);
        assert_eq!(api.calls("conversation_messages"), 2);
    }

    #[tokio::test]
    async fn test_send_then_echo_is_merged_once() {
        let api = Arc::new(FakeApi::default());
        let ravi = user("ravi", "Ravi");
        let mut state = MessagingState::new(api.clone(), me());

        let sent = state
            .send(&ravi, "hello", MessageType::Text)
            .await
            .unwrap();
        assert_eq!(state.conversations().len(), 1);
        assert_eq!(state.conversations()[0].other_user.id, ravi.id);
        assert_eq!(state.conversations()[0].unread_count, 0);

        let echo = ServerEvent::MessageSent(MessagePayload { message: sent });
        assert!(!state.apply(&echo));
        assert_eq!(state.conversations().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_sender_requests_reload() {
        let api = Arc::new(FakeApi::default());
        let mut state = MessagingState::new(api.clone(), me());
        let stranger = user("new-patient", "Kiran");
        let mut msg = message(&stranger, &me(), "hi", 0);
        // Profile embedded in the event is enough to build the summary.
        assert!(state.apply(&new_message(&msg)));
        assert_eq!(state.conversations().len(), 1);
        assert_eq!(state.conversations()[0].unread_count, 1);
        assert!(!state.needs_reload());

        // An echo of our own message to someone we have never seen.
        let nobody = user("nobody", "Nobody");
        msg = message(&me(), &nobody, "hello?", 5);
        assert!(state.apply(&ServerEvent::MessageSent(MessagePayload { message: msg })));
        assert!(state.needs_reload());
        assert_eq!(state.conversations().len(), 1);
    }

    #[tokio::test]
    async fn test_typing_indicator() {
        let api = Arc::new(FakeApi::default());
        let ravi = user("ravi", "Ravi");
        let mut state = MessagingState::new(api, me());

        assert!(state.apply(&ServerEvent::UserTyping(UserTypingPayload {
            sender_id: ravi.id.clone(),
            sender_name: ravi.name.clone(),
        })));
        assert!(state.is_typing(&ravi.id));

        assert!(state.apply(&ServerEvent::UserStoppedTyping(
            UserStoppedTypingPayload {
                sender_id: ravi.id.clone(),
            }
        )));
        assert!(!state.is_typing(&ravi.id));

        // A message from the typist clears the indicator too.
        state.apply(&ServerEvent::UserTyping(UserTypingPayload {
            sender_id: ravi.id.clone(),
            sender_name: ravi.name.clone(),
        }));
        state.apply(&new_message(&message(&ravi, &me(), "done", 0)));
        assert!(!state.is_typing(&ravi.id));
    }

    #[tokio::test]
    async fn test_mark_single_message_read() {
        let api = Arc::new(FakeApi::default());
        let ravi = user("ravi", "Ravi");
        let first = message(&ravi, &me(), "one", 0);
        let second = message(&ravi, &me(), "two", 10);
        let conv = first.message.conversation_id.clone();
        api.set_conversations(vec![summary_of(&second, &ravi, 2)]);

        api.set_thread(conv.clone(), vec![first.clone(), second.clone()]);

        let mut state = MessagingState::new(api.clone(), me());
        state.load().await.unwrap();
        // Leave the thread on screen with both messages still unread.
        api.fail_call("mark_conversation_read");
        assert!(state.open(&conv).await.is_err());
        assert_eq!(state.total_unread(), 2);

        api.fail_call("mark_message_read");
        assert!(state.mark_read(second.message.id).await.is_err());
        assert_eq!(state.total_unread(), 2);
        assert!(!state.conversations()[0].last_message.is_read);
        assert!(!state.active_thread().unwrap().messages[1].message.is_read);

        state.mark_read(second.message.id).await.unwrap();
        assert_eq!(state.total_unread(), 1);
        assert!(state.conversations()[0].last_message.is_read);
        let thread = state.active_thread().unwrap();
        assert!(!thread.messages[0].message.is_read);
        assert!(thread.messages[1].message.is_read);

        // Already read: no further change locally.
        state.mark_read(second.message.id).await.unwrap();
        assert_eq!(state.total_unread(), 1);
        assert_eq!(api.calls("mark_message_read"), 3);
    }
}

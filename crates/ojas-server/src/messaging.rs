//! Direct messaging shared by the REST API and the relay.

use std::collections::HashMap;

use tracing::debug;

use ojas_shared::api::{MessagePage, Pagination};
use ojas_shared::clock;
use ojas_shared::constants::MAX_MESSAGE_CONTENT;
use ojas_shared::models::{
    ConversationSummary, Message, MessageType, MessageWithSender, UserSummary,
};
use ojas_shared::protocol::{MessagePayload, ServerEvent};
use ojas_shared::{ConversationId, MessageId, UserId};

use crate::api::AppState;
use crate::error::{NotFoundExt, ServerError};
use crate::notifications;

/// Validate, persist and relay a message from `sender`.
///
/// The receiver gets `new_message` on every live connection; when it has
/// none, a message notification is stored for it instead.
pub async fn send_message(
    state: &AppState,
    sender: &UserSummary,
    receiver_id: Option<&str>,
    content: Option<&str>,
    message_type: MessageType,
) -> Result<MessageWithSender, ServerError> {
    let content = content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ServerError::Validation("Message content is required".into()))?;
    if content.len() > MAX_MESSAGE_CONTENT {
        return Err(ServerError::Validation(format!(
            "Message content exceeds {MAX_MESSAGE_CONTENT} bytes"
        )));
    }
    let receiver_id = receiver_id
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| ServerError::Validation("Receiver is required".into()))?;
    let receiver_id = UserId::parse(receiver_id.trim())?;
    if receiver_id == sender.id {
        return Err(ServerError::Validation("Cannot send a message to yourself".into()));
    }

    let message = Message::new(
        sender.id.clone(),
        receiver_id,
        content.to_string(),
        message_type,
        clock::now(),
    );

    {
        let db = state.db.lock().await;
        if !db.user_exists(&message.receiver_id)? {
            return Err(ServerError::NotFound("Receiver"));
        }
        db.insert_message(&message)?;
    }

    debug!(
        message = %message.id,
        conversation = %message.conversation_id,
        "Message stored"
    );

    let full = MessageWithSender {
        message,
        sender: sender.clone(),
    };
    relay_to_receiver(state, &full).await?;
    Ok(full)
}

/// Push the message to the receiver's connections, falling back to a
/// notification when none of them took it.
async fn relay_to_receiver(state: &AppState, full: &MessageWithSender) -> Result<(), ServerError> {
    let receiver = &full.message.receiver_id;
    let event = ServerEvent::NewMessage(MessagePayload {
        message: full.clone(),
    });
    if state.registry.send_to_user(receiver, event).await > 0 {
        return Ok(());
    }

    debug!(user = %receiver, message = %full.message.id, "Receiver unreachable, notifying");
    let notice = notifications::message_received(&full.message, &full.sender.name, clock::now());
    notifications::publish(state, vec![notice]).await?;
    Ok(())
}

/// The caller's conversations, most recently active first.
pub async fn conversations(
    state: &AppState,
    user: &UserId,
) -> Result<Vec<ConversationSummary>, ServerError> {
    let db = state.db.lock().await;
    let rows = db.get_user_conversations(user)?;

    let mut profiles: HashMap<UserId, UserSummary> = HashMap::new();
    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        let last = row.last_message;
        let other_id = if last.sender_id == *user {
            last.receiver_id.clone()
        } else {
            last.sender_id.clone()
        };
        let other_user = match profiles.get(&other_id) {
            Some(p) => p.clone(),
            None => {
                let p = db.get_user_summary(&other_id)?;
                profiles.insert(other_id, p.clone());
                p
            }
        };
        summaries.push(ConversationSummary {
            conversation_id: last.conversation_id.clone(),
            last_message: last,
            unread_count: row.unread_count,
            other_user,
        });
    }
    Ok(summaries)
}

/// One page of a conversation in chronological order. Only its two
/// participants may read it.
pub async fn conversation_page(
    state: &AppState,
    user: &UserId,
    conversation: &str,
    page: u32,
    limit: u32,
) -> Result<MessagePage, ServerError> {
    let conversation = ConversationId::parse(conversation)?;
    if !conversation.involves(user) {
        return Err(ServerError::NotFound("Conversation"));
    }

    let db = state.db.lock().await;
    let mut messages = db.get_conversation_messages(&conversation, limit, Pagination::offset(page, limit))?;
    messages.reverse();
    let total = db.count_conversation_messages(&conversation)?;

    let (a, b) = conversation.participants();
    let profiles = [db.get_user_summary(&a), db.get_user_summary(&b)];
    let lookup = |id: &UserId| {
        profiles
            .iter()
            .flatten()
            .find(|p| p.id == *id)
            .cloned()
            .ok_or(ServerError::NotFound("Sender"))
    };

    let messages = messages
        .into_iter()
        .map(|message| {
            let sender = lookup(&message.sender_id)?;
            Ok(MessageWithSender { message, sender })
        })
        .collect::<Result<Vec<_>, ServerError>>()?;

    Ok(MessagePage {
        messages,
        pagination: Pagination::new(page, limit, total),
    })
}

/// Mark a received message read. The sender may call this too; it leaves
/// the message unchanged.
pub async fn mark_read(
    state: &AppState,
    user: &UserId,
    id: MessageId,
) -> Result<Message, ServerError> {
    let db = state.db.lock().await;
    let message = db.get_message(id).or_not_found("Message")?;
    if message.receiver_id == *user {
        return Ok(db.mark_message_read(id, clock::now())?);
    }
    if message.sender_id == *user {
        return Ok(message);
    }
    Err(ServerError::NotFound("Message"))
}

/// Mark everything the caller received in a conversation as read.
pub async fn mark_conversation_read(
    state: &AppState,
    user: &UserId,
    conversation: &str,
) -> Result<u64, ServerError> {
    let conversation = ConversationId::parse(conversation)?;
    if !conversation.involves(user) {
        return Err(ServerError::NotFound("Conversation"));
    }
    let db = state.db.lock().await;
    Ok(db.mark_conversation_read(&conversation, user, clock::now())? as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{test_state, user_with_role};
    use ojas_shared::models::{NotificationKind, UserRole};
    use ojas_shared::ConnectionId;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_send_validation() {
        let state = test_state();
        let a = user_with_role(&state, "Asha", UserRole::Patient).await.summary();
        let b = user_with_role(&state, "Dr Rao", UserRole::Practitioner).await;
        let b_id = b.id.as_str();

        let cases = [
            (Some(b_id), None, "content"),
            (Some(b_id), Some("   "), "content"),
            (None, Some("hi"), "receiver"),
            (Some(a.id.as_str()), Some("hi"), "self"),
        ];
        for (receiver, content, label) in cases {
            let result = send_message(&state, &a, receiver, content, MessageType::Text).await;
            assert!(
                matches!(result, Err(ServerError::Validation(_))),
                "expected validation error for {label}"
            );
        }

        let result = send_message(&state, &a, Some("nobody"), Some("hi"), MessageType::Text).await;
        assert!(matches!(result, Err(ServerError::NotFound("Receiver"))));
    }

    #[tokio::test]
    async fn test_send_to_online_receiver_relays() {
        let state = test_state();
        let a = user_with_role(&state, "Asha", UserRole::Patient).await.summary();
        let b = user_with_role(&state, "Dr Rao", UserRole::Practitioner).await;
        let (tx, mut rx) = mpsc::channel(8);
        state.registry.register(ConnectionId::new(), b.summary(), tx).await;

        let sent = send_message(&state, &a, Some(b.id.as_str()), Some("namaste"), MessageType::Text)
            .await
            .unwrap();
        assert_eq!(sent.sender, a);
        assert_eq!(sent.message.conversation_id, ConversationId::between(&a.id, &b.id));
        assert!(!sent.message.is_read);

        match rx.recv().await {
            Some(ServerEvent::NewMessage(p)) => assert_eq!(p.message, sent),
            other => panic!("unexpected event: {other:?}"),
        }

        // No message notification for an online receiver.
        let page = notifications::list_for_user(&state, &b.id, false, 1, 20).await.unwrap();
        assert!(page.notifications.is_empty());
    }

    #[tokio::test]
    async fn test_offline_receiver_gets_notification() {
        let state = test_state();
        let a = user_with_role(&state, "Asha", UserRole::Patient).await.summary();
        let b = user_with_role(&state, "Dr Rao", UserRole::Practitioner).await;

        send_message(&state, &a, Some(b.id.as_str()), Some("hello"), MessageType::Text)
            .await
            .unwrap();

        let page = notifications::list_for_user(&state, &b.id, false, 1, 20).await.unwrap();
        assert_eq!(page.notifications.len(), 1);
        assert!(matches!(
            &page.notifications[0].kind,
            NotificationKind::Message { sender_id, .. } if *sender_id == a.id
        ));
    }

    #[tokio::test]
    async fn test_unreachable_receiver_gets_notification() {
        let state = test_state();
        let a = user_with_role(&state, "Asha", UserRole::Patient).await.summary();
        let b = user_with_role(&state, "Dr Rao", UserRole::Practitioner).await;
        // Registered, but the socket task has already gone away.
        let (tx, rx) = mpsc::channel(8);
        state.registry.register(ConnectionId::new(), b.summary(), tx).await;
        drop(rx);
        assert!(state.registry.is_online(&b.id).await);

        send_message(&state, &a, Some(b.id.as_str()), Some("hello"), MessageType::Text)
            .await
            .unwrap();

        let page = notifications::list_for_user(&state, &b.id, false, 1, 20).await.unwrap();
        assert_eq!(page.notifications.len(), 1);
        assert!(matches!(
            &page.notifications[0].kind,
            NotificationKind::Message { sender_id, .. } if *sender_id == a.id
        ));
    }

    #[tokio::test]
    async fn test_conversations_and_pages() {
        let state = test_state();
        let a = user_with_role(&state, "Asha", UserRole::Patient).await.summary();
        let b = user_with_role(&state, "Dr Rao", UserRole::Practitioner).await.summary();
        let c = user_with_role(&state, "Meera", UserRole::Patient).await.summary();

        send_message(&state, &a, Some(b.id.as_str()), Some("one"), MessageType::Text).await.unwrap();
        send_message(&state, &b, Some(a.id.as_str()), Some("two"), MessageType::Text).await.unwrap();
        send_message(&state, &b, Some(a.id.as_str()), Some("three"), MessageType::Text).await.unwrap();

        let convs = conversations(&state, &a.id).await.unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].other_user, b);
        assert_eq!(convs[0].unread_count, 2);
        assert_eq!(convs[0].last_message.content, "three");

        let conv = ConversationId::between(&a.id, &b.id);
        let page = conversation_page(&state, &a.id, conv.as_str(), 1, 50).await.unwrap();
        let texts: Vec<_> = page.messages.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
        assert_eq!(page.messages[1].sender, b);
        assert_eq!(page.pagination.total, 3);

        // Outsiders cannot read it.
        assert!(matches!(
            conversation_page(&state, &c.id, conv.as_str(), 1, 50).await,
            Err(ServerError::NotFound("Conversation"))
        ));

        assert_eq!(mark_conversation_read(&state, &a.id, conv.as_str()).await.unwrap(), 2);
        let convs = conversations(&state, &a.id).await.unwrap();
        assert_eq!(convs[0].unread_count, 0);
    }

    #[tokio::test]
    async fn test_mark_read_scoping() {
        let state = test_state();
        let a = user_with_role(&state, "Asha", UserRole::Patient).await.summary();
        let b = user_with_role(&state, "Dr Rao", UserRole::Practitioner).await.summary();
        let c = user_with_role(&state, "Meera", UserRole::Patient).await.summary();

        let sent = send_message(&state, &a, Some(b.id.as_str()), Some("hi"), MessageType::Text)
            .await
            .unwrap();
        let id = sent.message.id;

        assert!(matches!(
            mark_read(&state, &c.id, id).await,
            Err(ServerError::NotFound("Message"))
        ));
        assert!(!mark_read(&state, &a.id, id).await.unwrap().is_read);
        assert!(mark_read(&state, &b.id, id).await.unwrap().is_read);
        assert!(mark_read(&state, &b.id, id).await.unwrap().is_read);
        assert!(matches!(
            mark_read(&state, &b.id, MessageId::new()).await,
            Err(ServerError::NotFound("Message"))
        ));
    }
}

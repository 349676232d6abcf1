//! REST access to the clinic server.
//!
//! State containers depend on the [`ClinicApi`] trait only; [`HttpApi`] is
//! the reqwest-backed implementation used by real sessions.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use ojas_shared::api::{
    ErrorBody, MarkAllReadResponse, MessagePage, NotificationPage, SendMessageRequest,
};
use ojas_shared::models::{ConversationSummary, Message, MessageWithSender, Notification, User};
use ojas_shared::{ConversationId, MessageId, NotificationId};

use crate::error::{ClientError, Result};

#[async_trait]
pub trait ClinicApi: Send + Sync {
    async fn current_user(&self) -> Result<User>;

    async fn conversations(&self) -> Result<Vec<ConversationSummary>>;

    async fn conversation_messages(
        &self,
        conversation_id: &ConversationId,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage>;

    async fn send_message(&self, request: &SendMessageRequest) -> Result<MessageWithSender>;

    async fn mark_message_read(&self, id: MessageId) -> Result<Message>;

    async fn mark_conversation_read(&self, conversation_id: &ConversationId) -> Result<u64>;

    async fn notifications(&self, page: u32, limit: u32, unread_only: bool)
        -> Result<NotificationPage>;

    async fn mark_notification_read(&self, id: NotificationId) -> Result<Notification>;

    async fn mark_all_notifications_read(&self) -> Result<u64>;
}

/// [`ClinicApi`] over HTTP with a bearer session token.
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| status.to_string());
            tracing::debug!(status = status.as_u16(), "Request rejected by server");
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(self.request(method, path).json(body)).await
    }
}

#[async_trait]
impl ClinicApi for HttpApi {
    async fn current_user(&self) -> Result<User> {
        self.send(self.request(Method::GET, "/api/users/me")).await
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.send(self.request(Method::GET, "/api/messages/conversations"))
            .await
    }

    async fn conversation_messages(
        &self,
        conversation_id: &ConversationId,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage> {
        let path = format!("/api/messages/{conversation_id}");
        self.send(
            self.request(Method::GET, &path)
                .query(&[("page", page), ("limit", limit)]),
        )
        .await
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<MessageWithSender> {
        self.send_json(Method::POST, "/api/messages", request).await
    }

    async fn mark_message_read(&self, id: MessageId) -> Result<Message> {
        let path = format!("/api/messages/{id}/read");
        self.send(self.request(Method::PUT, &path)).await
    }

    async fn mark_conversation_read(&self, conversation_id: &ConversationId) -> Result<u64> {
        let path = format!("/api/messages/conversations/{conversation_id}/read");
        let resp: MarkAllReadResponse = self.send(self.request(Method::PUT, &path)).await?;
        Ok(resp.updated)
    }

    async fn notifications(
        &self,
        page: u32,
        limit: u32,
        unread_only: bool,
    ) -> Result<NotificationPage> {
        self.send(self.request(Method::GET, "/api/notifications").query(&[
            ("page", page.to_string()),
            ("limit", limit.to_string()),
            ("unreadOnly", unread_only.to_string()),
        ]))
        .await
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<Notification> {
        let path = format!("/api/notifications/{id}/read");
        self.send(self.request(Method::PUT, &path)).await
    }

    async fn mark_all_notifications_read(&self) -> Result<u64> {
        let resp: MarkAllReadResponse = self
            .send(self.request(Method::PUT, "/api/notifications/read-all"))
            .await?;
        Ok(resp.updated)
    }
}

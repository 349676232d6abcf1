//! WebSocket relay.
//!
//! Each socket gets a writer task draining a bounded outbound channel and
//! a reader loop that feeds frames to a [`RelaySession`]. The session is
//! the per-connection state machine: unauthenticated until a valid `join`,
//! then able to send messages and typing indicators.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ojas_shared::constants::RELAY_OUTBOUND_CAPACITY;
use ojas_shared::models::UserSummary;
use ojas_shared::protocol::{
    AuthenticatedPayload, ClientEvent, MessagePayload, SendMessagePayload, ServerEvent,
    TypingPayload, UserStoppedTypingPayload, UserTypingPayload,
};
use ojas_shared::{ConnectionId, UserId};

use crate::api::AppState;
use crate::auth;
use crate::error::ServerError;
use crate::messaging;
use crate::registry::Outbound;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, state))
}

async fn run_connection(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(RELAY_OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, event = event.name(), "Failed to encode event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut session = RelaySession::new(state, tx);
    info!(conn = %session.conn, "Relay connection opened");

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => session.handle_text(&text).await,
            Ok(WsMessage::Binary(_)) => {
                session.emit(ServerEvent::error("Binary frames are not supported"));
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %session.conn, error = %e, "Relay socket error");
                break;
            }
        }
    }

    let conn = session.conn;
    let user = session.user().map(|u| u.id.clone());
    session.close().await;
    writer.abort();
    info!(conn = %conn, user = ?user, "Relay connection closed");
}

/// State of one relay connection.
pub struct RelaySession {
    conn: ConnectionId,
    state: AppState,
    outbound: Outbound,
    user: Option<UserSummary>,
}

impl RelaySession {
    pub fn new(state: AppState, outbound: Outbound) -> Self {
        Self {
            conn: ConnectionId::new(),
            state,
            outbound,
            user: None,
        }
    }

    pub fn user(&self) -> Option<&UserSummary> {
        self.user.as_ref()
    }

    /// Parse and handle one text frame. Malformed frames get an `error`.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                debug!(conn = %self.conn, error = %e, "Malformed relay frame");
                self.emit(ServerEvent::error("Malformed event"));
            }
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Join(join) => self.join(join.token.as_deref()).await,
            other => self.handle_authenticated(other).await,
        }
    }

    async fn handle_authenticated(&mut self, event: ClientEvent) {
        let Some(user) = self.user.clone() else {
            self.emit(ServerEvent::error("Not authenticated"));
            return;
        };

        let result = match event {
            ClientEvent::Join(_) => Ok(()),
            ClientEvent::SendMessage(payload) => self.send_message(&user, payload).await,
            ClientEvent::TypingStart(payload) => self.typing(&user, payload, true).await,
            ClientEvent::TypingStop(payload) => self.typing(&user, payload, false).await,
        };

        if let Err(e) = result {
            debug!(conn = %self.conn, error = %e, "Relay request failed");
            self.emit(ServerEvent::error(e.public_message()));
        }
    }

    async fn join(&mut self, token: Option<&str>) {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            self.emit(ServerEvent::error("Authentication token required"));
            return;
        };

        match auth::authenticate(&self.state, token).await {
            Ok(user) => {
                let summary = user.summary();
                self.state
                    .registry
                    .register(self.conn, summary.clone(), self.outbound.clone())
                    .await;
                self.user = Some(summary.clone());
                self.emit(ServerEvent::Authenticated(AuthenticatedPayload { user: summary }));
            }
            Err(e) => {
                debug!(conn = %self.conn, error = %e, "Relay join rejected");
                self.emit(ServerEvent::error(e.public_message()));
            }
        }
    }

    async fn send_message(
        &self,
        user: &UserSummary,
        payload: SendMessagePayload,
    ) -> Result<(), ServerError> {
        let message = messaging::send_message(
            &self.state,
            user,
            payload.receiver_id.as_deref(),
            payload.content.as_deref(),
            payload.message_type,
        )
        .await?;
        self.emit(ServerEvent::MessageSent(MessagePayload { message }));
        Ok(())
    }

    async fn typing(
        &self,
        user: &UserSummary,
        payload: TypingPayload,
        started: bool,
    ) -> Result<(), ServerError> {
        let receiver = UserId::parse(&payload.receiver_id)?;
        let event = if started {
            ServerEvent::UserTyping(UserTypingPayload {
                sender_id: user.id.clone(),
                sender_name: user.name.clone(),
            })
        } else {
            ServerEvent::UserStoppedTyping(UserStoppedTypingPayload {
                sender_id: user.id.clone(),
            })
        };
        self.state.registry.send_to_user(&receiver, event).await;
        Ok(())
    }

    /// Queue an event for this connection only.
    fn emit(&self, event: ServerEvent) {
        if let Err(e) = self.outbound.try_send(event) {
            warn!(conn = %self.conn, error = %e, "Dropping event for own connection");
        }
    }

    /// Remove the connection from the registry.
    pub async fn close(self) {
        if self.user.is_some() {
            self.state.registry.unregister(self.conn).await;
        }
    }
}

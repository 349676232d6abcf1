//! One signed-in user's view of the clinic: identity, inbox and notifications.

use std::sync::Arc;

use tracing::{debug, warn};

use ojas_shared::models::UserSummary;
use ojas_shared::protocol::{ClientEvent, JoinPayload, ServerEvent, TypingPayload};
use ojas_shared::UserId;

use crate::api::ClinicApi;
use crate::error::Result;
use crate::messaging::MessagingState;
use crate::notifications::NotificationState;

pub struct ClientSession<A: ClinicApi> {
    me: UserSummary,
    messaging: MessagingState<A>,
    notifications: NotificationState<A>,
    authenticated: bool,
    last_error: Option<String>,
}

impl<A: ClinicApi> ClientSession<A> {
    /// Resolve the current user and load the inbox and notifications.
    pub async fn start(api: Arc<A>) -> Result<Self> {
        let me = api.current_user().await?.summary();
        debug!(user = %me.id, "Starting client session");
        let mut session = Self::new(api, me);
        session.load().await?;
        Ok(session)
    }

    pub fn new(api: Arc<A>, me: UserSummary) -> Self {
        Self {
            messaging: MessagingState::new(Arc::clone(&api), me.clone()),
            notifications: NotificationState::new(api),
            me,
            authenticated: false,
            last_error: None,
        }
    }

    pub fn me(&self) -> &UserSummary {
        &self.me
    }

    /// Whether the relay accepted our `join`.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn messaging(&self) -> &MessagingState<A> {
        &self.messaging
    }

    pub fn messaging_mut(&mut self) -> &mut MessagingState<A> {
        &mut self.messaging
    }

    pub fn notifications(&self) -> &NotificationState<A> {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationState<A> {
        &mut self.notifications
    }

    pub async fn load(&mut self) -> Result<()> {
        self.messaging.load().await?;
        self.notifications.load().await?;
        Ok(())
    }

    /// Route a relay event to the container that owns it.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::Authenticated(payload) => {
                self.authenticated = payload.user.id == self.me.id;
                if !self.authenticated {
                    warn!(user = %payload.user.id, "Relay authenticated a different user");
                }
                true
            }
            ServerEvent::Error(payload) => {
                warn!(message = %payload.message, "Relay reported an error");
                self.last_error = Some(payload.message.clone());
                true
            }
            ServerEvent::NewNotification(_) => self.notifications.apply(event),
            _ => self.messaging.apply(event),
        }
    }

    /// Decode and apply one text frame from the relay.
    pub fn apply_frame(&mut self, text: &str) -> Result<bool> {
        let event = ServerEvent::from_json(text)?;
        Ok(self.apply(&event))
    }

    /// First frame to send after the socket opens.
    pub fn join_frame(token: &str) -> Result<String> {
        let event = ClientEvent::Join(JoinPayload {
            token: Some(token.to_string()),
        });
        Ok(event.to_json()?)
    }

    pub fn typing_frame(receiver: &UserId, started: bool) -> Result<String> {
        let payload = TypingPayload {
            receiver_id: receiver.to_string(),
        };
        let event = if started {
            ClientEvent::TypingStart(payload)
        } else {
            ClientEvent::TypingStop(payload)
        };
        Ok(event.to_json()?)
    }
}

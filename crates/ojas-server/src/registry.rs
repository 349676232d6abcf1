//! Registry of live relay connections.
//!
//! A single task owns the map from connection to authenticated user and
//! serializes every mutation. The rest of the server talks to it through
//! a cloneable [`RegistryHandle`] that sends [`RegistryCommand`]s over an
//! mpsc channel; queries carry a oneshot reply.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use ojas_shared::models::UserSummary;
use ojas_shared::protocol::ServerEvent;
use ojas_shared::{ConnectionId, UserId};

/// Sending half of a connection's bounded outbound event buffer.
pub type Outbound = mpsc::Sender<ServerEvent>;

pub enum RegistryCommand {
    /// Bind a connection to a user. Re-registering moves it to the new user.
    Register {
        conn: ConnectionId,
        user: UserSummary,
        outbound: Outbound,
    },
    Unregister {
        conn: ConnectionId,
    },
    IsOnline {
        user: UserId,
        reply: oneshot::Sender<bool>,
    },
    /// Push an event to every connection of `user`; replies with how many
    /// connections accepted it.
    SendToUser {
        user: UserId,
        event: ServerEvent,
        reply: oneshot::Sender<usize>,
    },
    ConnectionCount(oneshot::Sender<usize>),
}

struct Entry {
    user: UserSummary,
    outbound: Outbound,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Entry>,
    groups: HashMap<UserId, HashSet<ConnectionId>>,
}

impl Registry {
    fn register(&mut self, conn: ConnectionId, user: UserSummary, outbound: Outbound) {
        self.unregister(conn);
        self.groups.entry(user.id.clone()).or_default().insert(conn);
        info!(
            conn = %conn,
            user = %user.id,
            connections = self.connections.len() + 1,
            "Connection registered"
        );
        self.connections.insert(conn, Entry { user, outbound });
    }

    fn unregister(&mut self, conn: ConnectionId) {
        let Some(entry) = self.connections.remove(&conn) else {
            return;
        };
        let user_id = entry.user.id;
        if let Some(group) = self.groups.get_mut(&user_id) {
            group.remove(&conn);
            if group.is_empty() {
                self.groups.remove(&user_id);
            }
        }
        info!(
            conn = %conn,
            user = %user_id,
            connections = self.connections.len(),
            "Connection unregistered"
        );
    }

    fn is_online(&self, user: &UserId) -> bool {
        self.groups.contains_key(user)
    }

    fn send_to_user(&self, user: &UserId, event: ServerEvent) -> usize {
        let Some(group) = self.groups.get(user) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in group {
            let Some(entry) = self.connections.get(conn) else {
                continue;
            };
            match entry.outbound.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        conn = %conn,
                        user = %user,
                        event = event.name(),
                        "Dropping event for slow connection"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(conn = %conn, "Outbound channel closed");
                }
            }
        }
        delivered
    }

    fn handle(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                conn,
                user,
                outbound,
            } => self.register(conn, user, outbound),
            RegistryCommand::Unregister { conn } => self.unregister(conn),
            RegistryCommand::IsOnline { user, reply } => {
                let _ = reply.send(self.is_online(&user));
            }
            RegistryCommand::SendToUser { user, event, reply } => {
                let _ = reply.send(self.send_to_user(&user, event));
            }
            RegistryCommand::ConnectionCount(reply) => {
                let _ = reply.send(self.connections.len());
            }
        }
    }
}

/// Cloneable handle to the registry task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

/// Spawn the registry task. It runs until every handle is dropped.
pub fn spawn_registry() -> RegistryHandle {
    let (tx, mut rx) = mpsc::channel::<RegistryCommand>(1024);

    tokio::spawn(async move {
        let mut registry = Registry::default();
        while let Some(cmd) = rx.recv().await {
            registry.handle(cmd);
        }
        debug!("Registry task terminated");
    });

    RegistryHandle { tx }
}

impl RegistryHandle {
    async fn send(&self, cmd: RegistryCommand) {
        if self.tx.send(cmd).await.is_err() {
            warn!("Registry task is gone, command dropped");
        }
    }

    pub async fn register(&self, conn: ConnectionId, user: UserSummary, outbound: Outbound) {
        self.send(RegistryCommand::Register {
            conn,
            user,
            outbound,
        })
        .await;
    }

    pub async fn unregister(&self, conn: ConnectionId) {
        self.send(RegistryCommand::Unregister { conn }).await;
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::IsOnline {
            user: user.clone(),
            reply,
        })
        .await;
        rx.await.unwrap_or(false)
    }

    /// Returns the number of connections the event was queued on.
    pub async fn send_to_user(&self, user: &UserId, event: ServerEvent) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::SendToUser {
            user: user.clone(),
            event,
            reply,
        })
        .await;
        rx.await.unwrap_or(0)
    }

    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(RegistryCommand::ConnectionCount(reply)).await;
        rx.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ojas_shared::models::UserRole;

    fn summary(id: &str) -> UserSummary {
        UserSummary {
            id: UserId::parse(id).unwrap(),
            name: format!("User {id}"),
            role: UserRole::Patient,
        }
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = spawn_registry();
        let user = summary("u1");
        let conn = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(8);

        registry.register(conn, user.clone(), tx).await;
        assert!(registry.is_online(&user.id).await);
        assert_eq!(registry.connection_count().await, 1);

        registry.unregister(conn).await;
        assert!(!registry.is_online(&user.id).await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_reaches_every_connection_of_user() {
        let registry = spawn_registry();
        let user = summary("u1");
        let other = summary("u2");

        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (tx3, mut rx3) = mpsc::channel(8);
        registry.register(ConnectionId::new(), user.clone(), tx1).await;
        registry.register(ConnectionId::new(), user.clone(), tx2).await;
        registry.register(ConnectionId::new(), other.clone(), tx3).await;

        let delivered = registry
            .send_to_user(&user.id, ServerEvent::error("ping"))
            .await;
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await, Some(ServerEvent::error("ping")));
        assert_eq!(rx2.recv().await, Some(ServerEvent::error("ping")));
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reregister_moves_connection() {
        let registry = spawn_registry();
        let first = summary("u1");
        let second = summary("u2");
        let conn = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(8);

        registry.register(conn, first.clone(), tx.clone()).await;
        registry.register(conn, second.clone(), tx).await;

        assert!(!registry.is_online(&first.id).await);
        assert!(registry.is_online(&second.id).await);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_event() {
        let registry = spawn_registry();
        let user = summary("u1");
        let (tx, mut rx) = mpsc::channel(1);
        registry.register(ConnectionId::new(), user.clone(), tx).await;

        assert_eq!(registry.send_to_user(&user.id, ServerEvent::error("a")).await, 1);
        assert_eq!(registry.send_to_user(&user.id, ServerEvent::error("b")).await, 0);
        assert_eq!(rx.recv().await, Some(ServerEvent::error("a")));
    }

    #[tokio::test]
    async fn test_offline_user_gets_nothing() {
        let registry = spawn_registry();
        let ghost = UserId::parse("ghost").unwrap();
        assert_eq!(registry.send_to_user(&ghost, ServerEvent::error("x")).await, 0);
    }
}

//! Registry of open push channels, one per user.
//!
//! Each WebSocket connection registers an unbounded sender feeding its
//! writer task. Registering again for the same user replaces the previous
//! connection; the old sender is dropped, which ends the old writer task and
//! closes that socket. Every registration carries a [`ConnectionId`] so a
//! closing socket can only remove its own entry, never its replacement.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use quickchat_proto::event::ServerEvent;
use quickchat_proto::message::UserId;

/// Identity of one accepted WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a fresh, time-ordered connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a connection's writer task should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encode and send an event frame.
    Event(ServerEvent),
    /// Send a close frame and stop.
    Close,
}

/// Result of pushing an event to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Handed to the user's writer task.
    Queued,
    /// The user has no open channel.
    Offline,
    /// The channel was registered but already closed; it has been removed.
    Dropped,
}

struct Connection {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Outbound>,
}

/// Maps each connected user to the sender half of its writer channel.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, Connection>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `user`, returning its id and whether an
    /// older connection was replaced.
    pub async fn register(
        &self,
        user: &UserId,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> (ConnectionId, bool) {
        let id = ConnectionId::new();
        let mut conns = self.connections.write().await;
        let replaced = conns.insert(user.clone(), Connection { id, sender }).is_some();
        drop(conns);
        (id, replaced)
    }

    /// Removes `user`'s registration if it still belongs to connection `id`.
    pub async fn unregister(&self, user: &UserId, id: ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        if conns.get(user).is_some_and(|c| c.id == id) {
            conns.remove(user);
            true
        } else {
            false
        }
    }

    /// Whether `user` currently has an open channel.
    pub async fn is_connected(&self, user: &UserId) -> bool {
        self.connections.read().await.contains_key(user)
    }

    /// Number of open channels.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no channel is open.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Hands `event` to `user`'s writer task without waiting for delivery.
    pub async fn push(&self, user: &UserId, event: ServerEvent) -> PushOutcome {
        let target = {
            let conns = self.connections.read().await;
            conns.get(user).map(|c| (c.id, c.sender.clone()))
        };
        let Some((id, sender)) = target else {
            return PushOutcome::Offline;
        };
        if sender.send(Outbound::Event(event)).is_ok() {
            PushOutcome::Queued
        } else {
            self.unregister(user, id).await;
            PushOutcome::Dropped
        }
    }

    /// Asks every open connection to close.
    ///
    /// Each writer task sends a close frame, which the client observes as a
    /// disconnect. Used for graceful shutdown and in tests.
    pub async fn close_all(&self) {
        let conns = self.connections.read().await;
        for (user, conn) in conns.iter() {
            tracing::info!(user_id = %user, connection = %conn.id, "closing push channel");
            let _ = conn.sender.send(Outbound::Close);
        }
    }
}

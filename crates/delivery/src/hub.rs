use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use shared::{domain::ConnectionId, protocol::ServerEvent};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Room(String),
    /// Every subscriber of the room except one connection (typing relays).
    RoomExcept {
        room: String,
        except: ConnectionId,
    },
    Connection(ConnectionId),
}

/// Fan-out capability the engine depends on. Room membership belongs to
/// the transport; the engine only asks to join and to publish.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn join(&self, connection: ConnectionId, room: &str);
    async fn publish(&self, target: Target, event: ServerEvent);
}

struct Subscriber {
    outbox: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<String>,
}

/// In-process broadcaster: one outbox and one room set per attached
/// connection.
#[derive(Clone, Default)]
pub struct Hub {
    connections: Arc<RwLock<HashMap<ConnectionId, Subscriber>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a connection; the transport drains the returned
    /// receiver into the socket.
    pub async fn attach(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (outbox, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(
            connection,
            Subscriber {
                outbox,
                rooms: HashSet::new(),
            },
        );
        rx
    }

    /// Forgets the connection together with all of its room subscriptions.
    pub async fn detach(&self, connection: ConnectionId) -> bool {
        self.connections.write().await.remove(&connection).is_some()
    }

    #[cfg(test)]
    pub(crate) async fn rooms_of(&self, connection: ConnectionId) -> Vec<String> {
        let connections = self.connections.read().await;
        let mut rooms: Vec<String> = connections
            .get(&connection)
            .map(|subscriber| subscriber.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    #[cfg(test)]
    pub(crate) async fn subscribers(&self, room: &str) -> Vec<ConnectionId> {
        self.connections
            .read()
            .await
            .iter()
            .filter(|(_, subscriber)| subscriber.rooms.contains(room))
            .map(|(connection, _)| *connection)
            .collect()
    }

    fn send(connection: ConnectionId, subscriber: &Subscriber, event: ServerEvent) {
        if subscriber.outbox.send(event).is_err() {
            debug!(%connection, "outbox closed; dropping event");
        }
    }
}

#[async_trait]
impl Broadcaster for Hub {
    async fn join(&self, connection: ConnectionId, room: &str) {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&connection) {
            Some(subscriber) => {
                subscriber.rooms.insert(room.to_string());
            }
            None => debug!(%connection, room, "join from unknown connection ignored"),
        }
    }

    async fn publish(&self, target: Target, event: ServerEvent) {
        let connections = self.connections.read().await;
        match target {
            Target::Connection(connection) => match connections.get(&connection) {
                Some(subscriber) => Self::send(connection, subscriber, event),
                None => debug!(%connection, "publish to unknown connection skipped"),
            },
            Target::Room(room) => {
                for (connection, subscriber) in connections.iter() {
                    if subscriber.rooms.contains(&room) {
                        Self::send(*connection, subscriber, event.clone());
                    }
                }
            }
            Target::RoomExcept { room, except } => {
                for (connection, subscriber) in connections.iter() {
                    if *connection != except && subscriber.rooms.contains(&room) {
                        Self::send(*connection, subscriber, event.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/hub_tests.rs"]
mod tests;

use std::{collections::HashMap, sync::Arc};

use shared::domain::ConnectionId;
use tokio::sync::RwLock;

/// Identity to connection map for the current process.
///
/// At most one connection is tracked per identity and the latest
/// registration wins. Entries are not durable: a restart forgets everyone,
/// which limits the service to a single instance.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    entries: Arc<RwLock<HashMap<String, ConnectionId>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the connection this registration superseded, if any.
    pub async fn register(&self, identity: &str, connection: ConnectionId) -> Option<ConnectionId> {
        self.entries
            .write()
            .await
            .insert(identity.to_string(), connection)
    }

    pub async fn resolve(&self, identity: &str) -> Option<ConnectionId> {
        self.entries.read().await.get(identity).copied()
    }

    /// Drops whatever identity still points at `connection`. A connection
    /// that never registered or was superseded removes nothing.
    pub async fn unregister(&self, connection: ConnectionId) -> Option<String> {
        let mut entries = self.entries.write().await;
        let identity = entries
            .iter()
            .find(|(_, registered)| **registered == connection)
            .map(|(identity, _)| identity.clone())?;
        entries.remove(&identity);
        Some(identity)
    }

    pub async fn online(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.entries.read().await.keys().cloned().collect();
        identities.sort();
        identities
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;

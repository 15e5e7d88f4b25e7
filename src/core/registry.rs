use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::connection::{Connection, ConnectionId};

/// Concurrent map of live connections to their owners.
///
/// Usernames are unique per live connection (the server refuses a second login),
/// so owner lookups return at most one meaningful match.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Register an authenticated connection
    pub async fn add(&self, connection: Arc<Connection>) {
        let mut connections = self.connections.write().await;
        connections.insert(connection.id, connection);
    }

    /// Register unless the username already owns a live connection
    pub async fn add_unique(&self, connection: Arc<Connection>) -> bool {
        let mut connections = self.connections.write().await;
        if connections
            .values()
            .any(|existing| existing.username == connection.username)
        {
            return false;
        }
        connections.insert(connection.id, connection);
        true
    }

    // Remove a connection, returning it if it was registered
    pub async fn delete(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        connections.remove(id)
    }

    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(id).cloned()
    }

    /// Linear scan for the connection owned by `username`
    pub async fn find_by_owner_name(&self, username: &str) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .find(|connection| connection.username == username)
            .cloned()
    }

    /// Usernames of every live connection, sorted
    pub async fn list_active_usernames(&self) -> Vec<String> {
        let connections = self.connections.read().await;
        let mut usernames: Vec<String> = connections
            .values()
            .map(|connection| connection.username.clone())
            .collect();
        usernames.sort();
        usernames
    }

    /// Visit every connection registered at the time of the call.
    ///
    /// The visit runs over a snapshot taken under the read lock, so `f` may
    /// freely await or trigger registry mutations. Order is unspecified.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        let snapshot: Vec<Arc<Connection>> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };

        for connection in &snapshot {
            f(connection);
        }
    }

    // Get current clients count
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }
}

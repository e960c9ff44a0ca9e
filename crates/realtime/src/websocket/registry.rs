//! Connection registry
//!
//! Owns every live connection and indexes them by user, so "all of a user's
//! tabs" is a lookup rather than a scan.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use tripdesk_shared::{ConnectionId, Role, UserId};

use super::connection::Connection;
use super::events::Envelope;
use super::room::TopicRouter;
use super::{read, write};

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

/// All active connections indexed by connection id and by user
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Registry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active connection
    pub fn register(
        &self,
        user_id: UserId,
        role: Role,
        sender: mpsc::UnboundedSender<Envelope>,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(user_id, role, sender));
        conn.activate();

        let mut inner = write(&self.inner);
        inner.connections.insert(conn.id, Arc::clone(&conn));
        inner.by_user.entry(user_id).or_default().insert(conn.id);

        tracing::info!(
            connection_id = %conn.id,
            user_id = %user_id,
            role = %role,
            total_connections = inner.connections.len(),
            "WebSocket connection registered"
        );

        conn
    }

    /// Remove a connection and all of its topic subscriptions
    ///
    /// The registry lock is held while the router is updated, so the two
    /// never disagree about whether a connection is live. Unknown ids are a
    /// no-op.
    pub fn unregister(&self, connection_id: &ConnectionId, router: &TopicRouter) -> Option<Arc<Connection>> {
        let mut inner = write(&self.inner);

        let conn = inner.connections.remove(connection_id)?;
        conn.begin_close();
        router.remove_connection(connection_id);

        if let Some(ids) = inner.by_user.get_mut(&conn.user_id) {
            ids.remove(connection_id);
            if ids.is_empty() {
                inner.by_user.remove(&conn.user_id);
            }
        }
        let remaining = inner.connections.len();
        drop(inner);

        conn.finish_close();

        tracing::info!(
            connection_id = %connection_id,
            user_id = %conn.user_id,
            remaining_connections = remaining,
            "WebSocket connection unregistered"
        );

        Some(conn)
    }

    /// Record liveness for a connection; returns false for unknown ids
    pub fn touch_heartbeat(&self, connection_id: &ConnectionId, at: Instant) -> bool {
        match read(&self.inner).connections.get(connection_id) {
            Some(conn) => {
                conn.touch(at);
                true
            }
            None => false,
        }
    }

    /// Ids of every open connection belonging to a user
    pub fn connections_for_user(&self, user_id: &UserId) -> HashSet<ConnectionId> {
        read(&self.inner).by_user.get(user_id).cloned().unwrap_or_default()
    }

    /// Every open connection belonging to a user
    pub fn user_connections(&self, user_id: &UserId) -> Vec<Arc<Connection>> {
        let inner = read(&self.inner);
        inner
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.connections.get(id).cloned())
            .collect()
    }

    /// Connections whose last heartbeat is older than `timeout`
    pub fn stale_connections(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        read(&self.inner)
            .connections
            .values()
            .filter(|conn| now.saturating_duration_since(conn.last_heartbeat()) > timeout)
            .map(|conn| conn.id)
            .collect()
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        read(&self.inner).connections.get(connection_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        read(&self.inner).connections.values().cloned().collect()
    }

    /// Get total number of active connections
    pub fn len(&self) -> usize {
        read(&self.inner).connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Topic room management for pub/sub
//!
//! Maps topics (`user:<id>`, `lead:<id>`, `role:<role>`, `presence`) to the
//! connections subscribed to them and broadcasts events to those rooms.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tripdesk_shared::{ConnectionId, RealtimeError, Topic, UserId};

use super::connection::Connection;
use super::events::Envelope;
use super::{read, write};

/// Recipients to skip in a broadcast
///
/// Used to avoid echoing an action back to whoever caused it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOptions {
    pub exclude_connection: Option<ConnectionId>,
    pub exclude_user: Option<UserId>,
}

impl BroadcastOptions {
    pub fn excluding_connection(connection_id: ConnectionId) -> Self {
        Self {
            exclude_connection: Some(connection_id),
            ..Self::default()
        }
    }

    pub fn excluding_user(user_id: UserId) -> Self {
        Self {
            exclude_user: Some(user_id),
            ..Self::default()
        }
    }

    fn skips(&self, conn: &Connection) -> bool {
        self.exclude_connection == Some(conn.id) || self.exclude_user == Some(conn.user_id)
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Rooms {
    /// topic -> subscribed connections
    rooms: HashMap<Topic, HashMap<ConnectionId, Arc<Connection>>>,
    /// connection -> topics, for O(1) cleanup on disconnect
    memberships: HashMap<ConnectionId, HashSet<Topic>>,
}

/// Manages topic "rooms" for broadcasting events
#[derive(Default)]
pub struct TopicRouter {
    inner: RwLock<Rooms>,
}

impl TopicRouter {
    /// Create a new router
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a topic room
    ///
    /// Returns `Ok(false)` when the pair already existed. Connections that
    /// have started closing are refused, so a subscribe racing a disconnect
    /// can never leave a dangling entry behind.
    pub fn join(&self, topic: Topic, conn: &Arc<Connection>) -> Result<bool, RealtimeError> {
        let mut inner = write(&self.inner);

        if !conn.is_active() {
            return Err(RealtimeError::Transport(format!(
                "connection {} is not active",
                conn.id
            )));
        }

        let added = inner
            .rooms
            .entry(topic)
            .or_default()
            .insert(conn.id, Arc::clone(conn))
            .is_none();
        inner.memberships.entry(conn.id).or_default().insert(topic);

        if added {
            let room_size = inner.rooms.get(&topic).map(HashMap::len).unwrap_or(0);
            tracing::debug!(
                topic = %topic,
                connection_id = %conn.id,
                room_size,
                "Connection joined topic room"
            );
        }

        Ok(added)
    }

    /// Remove a connection from a topic room; unknown pairs are a no-op
    pub fn leave(&self, topic: &Topic, connection_id: &ConnectionId) -> bool {
        let mut inner = write(&self.inner);

        let removed = match inner.rooms.get_mut(topic) {
            Some(conns) => {
                let removed = conns.remove(connection_id).is_some();
                if conns.is_empty() {
                    inner.rooms.remove(topic);
                    tracing::debug!(topic = %topic, "Removed empty topic room");
                }
                removed
            }
            None => false,
        };

        if let Some(topics) = inner.memberships.get_mut(connection_id) {
            topics.remove(topic);
            if topics.is_empty() {
                inner.memberships.remove(connection_id);
            }
        }

        if removed {
            tracing::debug!(
                topic = %topic,
                connection_id = %connection_id,
                "Connection left topic room"
            );
        }

        removed
    }

    /// Remove a connection from all rooms, returning how many it was in
    pub fn remove_connection(&self, connection_id: &ConnectionId) -> usize {
        let mut inner = write(&self.inner);

        let topics = inner.memberships.remove(connection_id).unwrap_or_default();
        for topic in &topics {
            if let Some(conns) = inner.rooms.get_mut(topic) {
                conns.remove(connection_id);
                if conns.is_empty() {
                    inner.rooms.remove(topic);
                }
            }
        }

        if !topics.is_empty() {
            tracing::debug!(
                connection_id = %connection_id,
                topic_count = topics.len(),
                "Removed connection from topic rooms"
            );
        }

        topics.len()
    }

    /// Broadcast an event to every connection in a topic room
    pub fn broadcast(&self, topic: &Topic, envelope: &Envelope, options: BroadcastOptions) -> DeliveryReport {
        self.broadcast_many(std::slice::from_ref(topic), Vec::new(), envelope, options)
    }

    /// Broadcast to the union of several rooms plus explicit recipients
    ///
    /// A connection reachable through more than one route receives the event
    /// once. Delivery happens under the read lock so an unregister cannot
    /// interleave with it.
    pub fn broadcast_many(
        &self,
        topics: &[Topic],
        extra_recipients: Vec<Arc<Connection>>,
        envelope: &Envelope,
        options: BroadcastOptions,
    ) -> DeliveryReport {
        let inner = read(&self.inner);

        let mut recipients: HashMap<ConnectionId, Arc<Connection>> = HashMap::new();
        for topic in topics {
            if let Some(conns) = inner.rooms.get(topic) {
                for (id, conn) in conns {
                    recipients.entry(*id).or_insert_with(|| Arc::clone(conn));
                }
            }
        }
        for conn in extra_recipients {
            recipients.entry(conn.id).or_insert(conn);
        }

        let report = deliver(recipients.values(), envelope, options);

        tracing::debug!(
            topics = ?topics.iter().map(ToString::to_string).collect::<Vec<_>>(),
            event_type = envelope.kind(),
            recipients = report.delivered,
            failed = report.failed,
            "Broadcast event to topic rooms"
        );

        report
    }

    /// Connections currently subscribed to a topic
    pub fn subscribers(&self, topic: &Topic) -> Vec<Arc<Connection>> {
        read(&self.inner)
            .rooms
            .get(topic)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Topics a connection is subscribed to
    pub fn topics_for(&self, connection_id: &ConnectionId) -> HashSet<Topic> {
        read(&self.inner)
            .memberships
            .get(connection_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, connection_id: &ConnectionId, topic: &Topic) -> bool {
        read(&self.inner)
            .rooms
            .get(topic)
            .is_some_and(|conns| conns.contains_key(connection_id))
    }

    /// Get room size (number of connections) for a topic
    pub fn room_size(&self, topic: &Topic) -> usize {
        read(&self.inner).rooms.get(topic).map(HashMap::len).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub fn room_count(&self) -> usize {
        read(&self.inner).rooms.len()
    }
}

/// Push one envelope to each recipient, isolating failures
fn deliver<'a>(
    recipients: impl Iterator<Item = &'a Arc<Connection>>,
    envelope: &Envelope,
    options: BroadcastOptions,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    for conn in recipients {
        if options.skips(conn) {
            continue;
        }

        match conn.send(envelope.clone()) {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    connection_id = %conn.id,
                    user_id = %conn.user_id,
                    event_type = envelope.kind(),
                    error = %err,
                    "Failed to deliver event to connection (likely closed)"
                );
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::events::ServerEvent;
    use tokio::sync::mpsc;
    use tripdesk_shared::{LeadId, Role};

    fn connection(user_id: UserId) -> (Arc<Connection>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(user_id, Role::Consultant, tx);
        conn.activate();
        (Arc::new(conn), rx)
    }

    fn pong() -> Envelope {
        Envelope::new(ServerEvent::Pong {})
    }

    #[test]
    fn test_room_join_and_leave() {
        let router = TopicRouter::new();
        let topic = Topic::Lead(LeadId(1));
        let (conn, _rx) = connection(UserId::new());

        assert_eq!(router.room_size(&topic), 0);

        assert!(router.join(topic, &conn).unwrap());
        assert_eq!(router.room_size(&topic), 1);
        assert!(router.is_subscribed(&conn.id, &topic));

        assert!(router.leave(&topic, &conn.id));
        assert_eq!(router.room_size(&topic), 0);
        assert_eq!(router.room_count(), 0);
    }

    #[test]
    fn test_join_is_idempotent() {
        let router = TopicRouter::new();
        let topic = Topic::Presence;
        let (conn, _rx) = connection(UserId::new());

        assert!(router.join(topic, &conn).unwrap());
        assert!(!router.join(topic, &conn).unwrap());
        assert_eq!(router.room_size(&topic), 1);
    }

    #[test]
    fn test_leave_twice_is_noop() {
        let router = TopicRouter::new();
        let topic = Topic::Lead(LeadId(3));
        let (conn, _rx) = connection(UserId::new());

        router.join(topic, &conn).unwrap();
        assert!(router.leave(&topic, &conn.id));
        assert!(!router.leave(&topic, &conn.id));
        assert!(!router.leave(&Topic::Presence, &conn.id));
        assert!(router.topics_for(&conn.id).is_empty());
    }

    #[test]
    fn test_join_refused_for_closing_connection() {
        let router = TopicRouter::new();
        let (conn, _rx) = connection(UserId::new());
        conn.begin_close();

        let result = router.join(Topic::Presence, &conn);
        assert!(matches!(result, Err(RealtimeError::Transport(_))));
        assert_eq!(router.room_count(), 0);
    }

    #[test]
    fn test_broadcast_to_room() {
        let router = TopicRouter::new();
        let topic = Topic::Lead(LeadId(1));

        let (conn1, mut rx1) = connection(UserId::new());
        let (conn2, mut rx2) = connection(UserId::new());
        let (outsider, mut rx3) = connection(UserId::new());

        router.join(topic, &conn1).unwrap();
        router.join(topic, &conn2).unwrap();
        router.join(Topic::Presence, &outsider).unwrap();

        let report = router.broadcast(&topic, &pong(), BroadcastOptions::default());
        assert_eq!(report, DeliveryReport { delivered: 2, failed: 0 });

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_excludes_connection_and_user() {
        let router = TopicRouter::new();
        let topic = Topic::Lead(LeadId(8));
        let sender = UserId::new();

        let (sender_tab1, mut rx1) = connection(sender);
        let (sender_tab2, mut rx2) = connection(sender);
        let (other, mut rx3) = connection(UserId::new());

        for conn in [&sender_tab1, &sender_tab2, &other] {
            router.join(topic, conn).unwrap();
        }

        let report = router.broadcast(
            &topic,
            &pong(),
            BroadcastOptions::excluding_connection(sender_tab1.id),
        );
        assert_eq!(report.delivered, 2);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());

        let report = router.broadcast(&topic, &pong(), BroadcastOptions::excluding_user(sender));
        assert_eq!(report.delivered, 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_survives_dead_recipients() {
        let router = TopicRouter::new();
        let topic = Topic::Role(Role::Consultant);

        let mut live = Vec::new();
        let mut dead = Vec::new();
        for i in 0..5 {
            let (conn, rx) = connection(UserId::new());
            router.join(topic, &conn).unwrap();
            if i < 2 {
                dead.push(rx);
            } else {
                live.push(rx);
            }
        }
        // Two sockets vanish before the broadcast reaches them
        drop(dead);

        for _ in 0..3 {
            let report = router.broadcast(&topic, &pong(), BroadcastOptions::default());
            assert_eq!(report, DeliveryReport { delivered: 3, failed: 2 });
        }

        for mut rx in live {
            for _ in 0..3 {
                assert!(rx.try_recv().is_ok());
            }
        }
    }

    #[test]
    fn test_broadcast_many_delivers_once_per_connection() {
        let router = TopicRouter::new();
        let lead = Topic::Lead(LeadId(42));
        let role = Topic::Role(Role::Consultant);

        let (conn, mut rx) = connection(UserId::new());
        router.join(lead, &conn).unwrap();
        router.join(role, &conn).unwrap();

        let report = router.broadcast_many(&[lead, role], vec![Arc::clone(&conn)], &pong(), BroadcastOptions::default());
        assert_eq!(report.delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remove_connection_from_all_rooms() {
        let router = TopicRouter::new();
        let (conn, _rx) = connection(UserId::new());

        router.join(Topic::Lead(LeadId(1)), &conn).unwrap();
        router.join(Topic::Lead(LeadId(2)), &conn).unwrap();
        assert_eq!(router.room_count(), 2);

        assert_eq!(router.remove_connection(&conn.id), 2);
        assert_eq!(router.room_count(), 0);
        assert_eq!(router.remove_connection(&conn.id), 0);
    }

    #[test]
    fn test_broadcast_preserves_submission_order() {
        let router = TopicRouter::new();
        let topic = Topic::Lead(LeadId(11));
        let (conn, mut rx) = connection(UserId::new());
        router.join(topic, &conn).unwrap();

        for i in 0..10 {
            let envelope = Envelope::new(ServerEvent::error("SEQ", i.to_string()));
            router.broadcast(&topic, &envelope, BroadcastOptions::default());
        }

        for i in 0..10 {
            match rx.try_recv().unwrap().event {
                ServerEvent::Error { message, .. } => assert_eq!(message, i.to_string()),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}

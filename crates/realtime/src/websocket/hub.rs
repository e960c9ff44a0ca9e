//! Realtime hub
//!
//! The process-scoped coordinator that owns the connection registry, topic
//! router and presence tracker. Created once at startup with
//! [`RealtimeHub::start`] and torn down with [`RealtimeHub::shutdown`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use tripdesk_shared::{ConnectionId, RealtimeError, Topic, UserId};

use crate::auth::{Identity, TopicPolicy};
use crate::config::Config;

use super::connection::Connection;
use super::events::{DomainEvent, Envelope, PresencePayload, ServerEvent};
use super::fanout::{self, EventFanout, FanoutHandle};
use super::presence::{PresenceChange, PresenceTracker};
use super::registry::ConnectionRegistry;
use super::room::{BroadcastOptions, DeliveryReport, TopicRouter};
use super::shutdown_signalled;

/// Timing knobs for the hub
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Connections silent for longer than this are reaped
    pub heartbeat_timeout: Duration,
    pub reaper_interval: Duration,
    /// Delay before a user with no connections is shown offline
    pub presence_grace: Duration,
    /// How long offline presence records are kept
    pub presence_retention: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(15),
            presence_grace: Duration::from_secs(5),
            presence_retention: Duration::from_secs(3600),
        }
    }
}

impl From<&Config> for HubConfig {
    fn from(config: &Config) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout(),
            reaper_interval: config.reaper_interval(),
            presence_grace: config.presence_grace(),
            presence_retention: config.presence_retention(),
        }
    }
}

/// Background tasks owned by a running hub
pub struct HubTasks {
    reaper: JoinHandle<()>,
    presence: JoinHandle<()>,
    fanout: JoinHandle<()>,
}

/// Statistics about the realtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Number of active connections
    pub active_connections: usize,
    /// Number of non-empty topic rooms
    pub active_rooms: usize,
    /// Users currently shown online
    pub online_users: usize,
}

/// Process-wide realtime state shared across all connections
#[derive(Clone)]
pub struct RealtimeHub {
    registry: Arc<ConnectionRegistry>,
    router: Arc<TopicRouter>,
    presence: Arc<PresenceTracker>,
    policy: Arc<dyn TopicPolicy>,
    fanout: FanoutHandle,
    config: HubConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RealtimeHub {
    /// Build the hub and spawn its reaper, presence pump and fanout engine
    pub fn start(config: HubConfig, policy: Arc<dyn TopicPolicy>) -> (Self, HubTasks) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(TopicRouter::new());
        let (presence, presence_rx) = PresenceTracker::new(config.presence_grace);
        let (shutdown, _) = watch::channel(false);

        let (fanout, fanout_task) =
            EventFanout::new(Arc::clone(&registry), Arc::clone(&router)).spawn(shutdown.subscribe());

        let hub = Self {
            registry,
            router,
            presence,
            policy,
            fanout,
            config,
            shutdown: Arc::new(shutdown),
        };

        let tasks = HubTasks {
            reaper: tokio::spawn(hub.clone().run_reaper(hub.shutdown.subscribe())),
            presence: tokio::spawn(hub.clone().run_presence_pump(presence_rx, hub.shutdown.subscribe())),
            fanout: fanout_task,
        };

        tracing::info!(
            heartbeat_timeout_secs = config.heartbeat_timeout.as_secs(),
            presence_grace_ms = config.presence_grace.as_millis() as u64,
            "Realtime hub started"
        );

        (hub, tasks)
    }

    /// Signal background tasks to stop and close every live connection
    ///
    /// Returns how many connections were closed. Safe to call repeatedly.
    pub fn begin_shutdown(&self) -> usize {
        self.shutdown.send_replace(true);

        let connections = self.registry.all();
        let closed = connections.len();
        for conn in connections {
            self.disconnect(&conn.id);
        }
        closed
    }

    /// Stop background tasks and close every live connection
    pub async fn shutdown(&self, tasks: HubTasks) {
        let closed = self.begin_shutdown();

        for (name, task) in [
            ("reaper", tasks.reaper),
            ("presence", tasks.presence),
            ("fanout", tasks.fanout),
        ] {
            if let Err(e) = task.await {
                tracing::error!(task = name, error = ?e, "Realtime task ended abnormally");
            }
        }

        tracing::info!(closed_connections = closed, "Realtime hub stopped");
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Register an authenticated connection and subscribe its standard topics
    pub fn connect(&self, identity: Identity, sender: mpsc::UnboundedSender<Envelope>) -> Arc<Connection> {
        let conn = self.registry.register(identity.user_id, identity.role, sender);
        self.ensure_standard_subscriptions(&conn);
        self.open_presence(&conn);
        conn
    }

    /// Count the connection towards its user's presence
    ///
    /// A connection already unregistered (for example by `begin_shutdown`
    /// racing the handshake) is never counted.
    fn open_presence(&self, conn: &Connection) -> bool {
        conn.count_presence(|| self.presence.connection_opened(conn.user_id, conn.role))
    }

    /// Subscribe `user:<id>`, `role:<role>` and `presence`
    ///
    /// Idempotent: returns how many subscriptions were newly created.
    pub fn ensure_standard_subscriptions(&self, conn: &Arc<Connection>) -> usize {
        let topics = [
            Topic::User(conn.user_id),
            Topic::Role(conn.role),
            Topic::Presence,
        ];

        let mut added = 0;
        for topic in topics {
            if !self.policy.can_subscribe(conn.user_id, conn.role, &topic) {
                continue;
            }
            match self.router.join(topic, conn) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(connection_id = %conn.id, error = %e, "Skipped standard subscription");
                }
            }
        }
        added
    }

    /// Remove a connection; idempotent
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        match self.registry.unregister(connection_id, &self.router) {
            Some(conn) => {
                if conn.uncount_presence() {
                    self.presence.connection_closed(conn.user_id);
                }
                true
            }
            None => false,
        }
    }

    pub fn touch_heartbeat(&self, connection_id: &ConnectionId) -> bool {
        self.registry.touch_heartbeat(connection_id, Instant::now())
    }

    /// Unregister connections whose heartbeat has timed out
    pub fn reap_stale(&self) -> usize {
        let stale = self
            .registry
            .stale_connections(Instant::now(), self.config.heartbeat_timeout);

        for connection_id in &stale {
            tracing::warn!(connection_id = %connection_id, "Heartbeat timeout, closing connection");
            self.disconnect(connection_id);
        }

        stale.len()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe a connection to a topic, subject to the topic policy
    pub fn subscribe(&self, connection_id: &ConnectionId, topic: Topic) -> Result<(), RealtimeError> {
        let conn = self
            .registry
            .get(connection_id)
            .ok_or_else(|| RealtimeError::Transport(format!("unknown connection {connection_id}")))?;

        if !self.policy.can_subscribe(conn.user_id, conn.role, &topic) {
            tracing::warn!(
                connection_id = %connection_id,
                user_id = %conn.user_id,
                topic = %topic,
                "Subscription denied"
            );
            return Err(RealtimeError::Authorization {
                topic: topic.to_string(),
            });
        }

        self.router.join(topic, &conn)?;
        Ok(())
    }

    /// Subscribe and get a handle that unsubscribes when dropped
    pub fn subscribe_scoped(
        &self,
        connection_id: &ConnectionId,
        topic: Topic,
    ) -> Result<TopicSubscription, RealtimeError> {
        self.subscribe(connection_id, topic)?;
        Ok(TopicSubscription {
            router: Arc::clone(&self.router),
            connection_id: *connection_id,
            topic,
        })
    }

    /// Idempotent removal of a subscription
    pub fn unsubscribe(&self, connection_id: &ConnectionId, topic: &Topic) -> bool {
        self.router.leave(topic, connection_id)
    }

    pub fn is_subscribed(&self, connection_id: &ConnectionId, topic: &Topic) -> bool {
        self.router.is_subscribed(connection_id, topic)
    }

    pub fn topics_for(&self, connection_id: &ConnectionId) -> HashSet<Topic> {
        self.router.topics_for(connection_id)
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Deliver an event to every subscriber of a topic
    pub fn broadcast(&self, topic: &Topic, event: ServerEvent, options: BroadcastOptions) -> DeliveryReport {
        let envelope = Envelope::new(event);
        fanout::route(
            &self.registry,
            &self.router,
            std::slice::from_ref(topic),
            &envelope,
            options,
        )
    }

    /// Fire-and-forget submission of a domain event
    pub fn emit(&self, event: DomainEvent) {
        self.fanout.emit(event);
    }

    pub fn fanout(&self) -> &FanoutHandle {
        &self.fanout
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn connections_for_user(&self, user_id: &UserId) -> HashSet<ConnectionId> {
        self.registry.connections_for_user(user_id)
    }

    pub fn connection(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        self.registry.get(connection_id)
    }

    pub fn online_users(&self) -> HashSet<UserId> {
        self.presence.online_users()
    }

    pub fn presence_snapshot(&self) -> Vec<PresencePayload> {
        self.presence.snapshot().iter().map(|presence| presence.payload()).collect()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            active_connections: self.registry.len(),
            active_rooms: self.router.room_count(),
            online_users: self.presence.online_users().len(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    async fn run_reaper(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.reaper_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let reaped = self.reap_stale();
                    let pruned = self
                        .presence
                        .prune(self.config.presence_retention, OffsetDateTime::now_utc());
                    if reaped > 0 || pruned > 0 {
                        tracing::info!(reaped, pruned, "Reaper pass complete");
                    }
                }
            }
        }
    }

    async fn run_presence_pump(
        self,
        mut changes: mpsc::UnboundedReceiver<PresenceChange>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                change = changes.recv() => match change {
                    Some(change) => {
                        self.publish_presence(&change);
                    }
                    None => break,
                },
            }
        }
    }

    /// Broadcast a presence transition to `presence` and `role:<role>`
    fn publish_presence(&self, change: &PresenceChange) -> DeliveryReport {
        let envelope = Envelope::new(ServerEvent::PresenceChanged(change.payload()));
        self.router.broadcast_many(
            &[Topic::Presence, Topic::Role(change.role)],
            Vec::new(),
            &envelope,
            BroadcastOptions::default(),
        )
    }
}

/// A subscription released when the handle is dropped
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct TopicSubscription {
    router: Arc<TopicRouter>,
    connection_id: ConnectionId,
    topic: Topic,
}

impl TopicSubscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        self.router.leave(&self.topic, &self.connection_id);
    }
}

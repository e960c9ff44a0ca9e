//! WebSocket support for real-time features
//!
//! Provides the presence and event-fanout layer of the CRM:
//! - User presence tracking (online/offline with a reconnect grace window)
//! - Topic rooms (`user:<id>`, `lead:<id>`, `role:<role>`, `presence`)
//! - Typing indicators, lead status changes, inbox messages, notifications
//!
//! # Architecture
//!
//! - **Connection**: an authenticated socket and its outbound channel
//! - **Registry**: every live connection, indexed by user
//! - **Room**: topic-based pub/sub for broadcasting events
//! - **Presence**: online/offline derived from connection counts
//! - **Fanout**: routes domain events from CRM producers to topics
//! - **Hub**: process-scoped coordinator owning all of the above
//! - **Session**: per-connection lifecycle and client commands
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: wire types for client/server communication
//!
//! Lock order is always registry before router. No lock is held across an
//! `.await`.

pub mod connection;
pub mod events;
pub mod fanout;
pub mod handler;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod room;
pub mod session;

pub use fanout::{EventFanout, FanoutHandle};
pub use handler::ws_handler;
pub use hub::{HubConfig, HubStats, HubTasks, RealtimeHub, TopicSubscription};
pub use room::{BroadcastOptions, DeliveryReport};
pub use session::{ClientSession, SessionState};

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

// A panic while holding one of these locks leaves plain collections behind,
// which are still consistent enough to keep serving.

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once shutdown has been signalled (or the hub is gone)
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

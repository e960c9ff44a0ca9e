//! WebSocket connection management
//!
//! Represents one live socket: its owner, outbound channel, liveness and
//! lifecycle state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use tripdesk_shared::{ConnectionId, RealtimeError, Role, UserId};

use super::events::{Envelope, ServerEvent};
use super::lock;

/// Lifecycle of a registered connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique ID for this socket
    pub id: ConnectionId,

    /// Authenticated user ID
    pub user_id: UserId,

    /// Role resolved at handshake
    pub role: Role,

    /// Channel to send events to this connection
    sender: mpsc::UnboundedSender<Envelope>,

    state: Mutex<ConnectionState>,

    last_heartbeat: Mutex<Instant>,

    /// Flipped to true once the connection is closed server-side
    closed: watch::Sender<bool>,

    /// Whether this socket is included in its user's presence count
    presence_counted: AtomicBool,
}

impl Connection {
    /// Create a new connection in the `connecting` state
    pub fn new(user_id: UserId, role: Role, sender: mpsc::UnboundedSender<Envelope>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: ConnectionId::new(),
            user_id,
            role,
            sender,
            state: Mutex::new(ConnectionState::Connecting),
            last_heartbeat: Mutex::new(Instant::now()),
            closed,
            presence_counted: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// `connecting -> active`
    pub(crate) fn activate(&self) {
        let mut state = lock(&self.state);
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Active;
        }
    }

    /// Moves to `closing`; returns false if the connection was already
    /// closing or closed.
    pub(crate) fn begin_close(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            ConnectionState::Connecting | ConnectionState::Active => {
                *state = ConnectionState::Closing;
                true
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        }
    }

    /// Moves to `closed` and wakes anyone waiting on [`Connection::closed`]
    pub(crate) fn finish_close(&self) {
        *lock(&self.state) = ConnectionState::Closed;
        self.closed.send_replace(true);
    }

    /// Runs `open` and marks the connection as counted in presence
    ///
    /// Skipped once the connection has started closing, or if it is already
    /// counted. The state lock is held while `open` runs so a concurrent
    /// [`Connection::uncount_presence`] always observes a finished open.
    pub(crate) fn count_presence(&self, open: impl FnOnce()) -> bool {
        let state = lock(&self.state);
        if matches!(*state, ConnectionState::Closing | ConnectionState::Closed) {
            return false;
        }
        if self.presence_counted.swap(true, Ordering::AcqRel) {
            return false;
        }
        open();
        drop(state);
        true
    }

    /// Clears the presence mark; true if it was set
    pub(crate) fn uncount_presence(&self) -> bool {
        let _state = lock(&self.state);
        self.presence_counted.swap(false, Ordering::AcqRel)
    }

    /// Resolves once the server has closed this connection
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so this only errors if it is dropped.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Send an event to this connection
    ///
    /// Fails if the connection is no longer active or the socket writer has
    /// gone away.
    pub fn send(&self, envelope: Envelope) -> Result<(), RealtimeError> {
        let state = self.state();
        if state != ConnectionState::Active {
            return Err(RealtimeError::Delivery {
                connection_id: self.id,
                reason: format!("connection is {state:?}").to_lowercase(),
            });
        }

        self.sender.send(envelope).map_err(|_| RealtimeError::Delivery {
            connection_id: self.id,
            reason: "outbound channel closed".to_string(),
        })
    }

    /// Send a bare server event, stamping it now
    pub fn send_event(&self, event: ServerEvent) -> Result<(), RealtimeError> {
        self.send(Envelope::new(event))
    }

    pub fn touch(&self, at: Instant) {
        let mut last = lock(&self.last_heartbeat);
        if at > *last {
            *last = at;
        }
    }

    pub fn last_heartbeat(&self) -> Instant {
        *lock(&self.last_heartbeat)
    }
}

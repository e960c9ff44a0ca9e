//! Presence tracking
//!
//! Derives online/offline state per user from their live connection count.
//! Going offline is debounced by a grace window so page reloads and quick
//! reconnects do not flap the indicator.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tripdesk_shared::{Role, UserId};

use super::events::{PresencePayload, PresenceStatus};
use super::lock;

/// A visible online/offline transition for one user
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceChange {
    pub user_id: UserId,
    pub role: Role,
    pub status: PresenceStatus,
    pub at: OffsetDateTime,
}

impl PresenceChange {
    pub fn payload(&self) -> PresencePayload {
        PresencePayload {
            user_id: self.user_id,
            role: self.role,
            status: self.status,
            last_seen_at: match self.status {
                PresenceStatus::Online => None,
                PresenceStatus::Offline => Some(self.at),
            },
        }
    }
}

/// Presence record for one user
#[derive(Debug, Clone)]
pub struct UserPresence {
    pub user_id: UserId,
    pub role: Role,
    pub active_connections: usize,
    /// Visible status; stays true while an offline transition is pending
    pub online: bool,
    pub last_seen: Option<OffsetDateTime>,
}

impl UserPresence {
    pub fn payload(&self) -> PresencePayload {
        PresencePayload {
            user_id: self.user_id,
            role: self.role,
            status: if self.online {
                PresenceStatus::Online
            } else {
                PresenceStatus::Offline
            },
            last_seen_at: self.last_seen,
        }
    }
}

struct Entry {
    presence: UserPresence,
    /// Bumped whenever a pending offline transition is scheduled or cancelled
    generation: u64,
    pending_offline: Option<JoinHandle<()>>,
}

/// Tracks which users are online
///
/// Transitions are pushed, in order, onto the channel returned by
/// [`PresenceTracker::new`]; the hub drains it and broadcasts
/// `presence:changed`.
pub struct PresenceTracker {
    users: Mutex<HashMap<UserId, Entry>>,
    grace: Duration,
    changes: mpsc::UnboundedSender<PresenceChange>,
}

impl PresenceTracker {
    pub fn new(grace: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<PresenceChange>) {
        let (changes, rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(Self {
            users: Mutex::new(HashMap::new()),
            grace,
            changes,
        });
        (tracker, rx)
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// A connection for `user_id` became active
    pub fn connection_opened(&self, user_id: UserId, role: Role) {
        let mut users = lock(&self.users);
        let entry = users.entry(user_id).or_insert_with(|| Entry {
            presence: UserPresence {
                user_id,
                role,
                active_connections: 0,
                online: false,
                last_seen: None,
            },
            generation: 0,
            pending_offline: None,
        });

        entry.presence.active_connections += 1;
        entry.presence.role = role;

        if let Some(pending) = entry.pending_offline.take() {
            pending.abort();
            entry.generation += 1;
            tracing::debug!(user_id = %user_id, "Reconnect inside grace window, offline cancelled");
        }

        if !entry.presence.online {
            entry.presence.online = true;
            self.publish(PresenceChange {
                user_id,
                role,
                status: PresenceStatus::Online,
                at: OffsetDateTime::now_utc(),
            });
        }
    }

    /// A connection for `user_id` closed
    ///
    /// When it was the last one, the offline transition fires after the grace
    /// window unless the user reconnects first. Must be called from inside a
    /// tokio runtime when the grace window is non-zero.
    pub fn connection_closed(self: &Arc<Self>, user_id: UserId) {
        let mut users = lock(&self.users);
        let Some(entry) = users.get_mut(&user_id) else {
            return;
        };

        entry.presence.active_connections = entry.presence.active_connections.saturating_sub(1);
        if entry.presence.active_connections > 0 || !entry.presence.online {
            return;
        }

        entry.generation += 1;
        let generation = entry.generation;

        if self.grace.is_zero() {
            drop(users);
            self.finalize_offline(user_id, generation);
            return;
        }

        let tracker = Arc::clone(self);
        let grace = self.grace;
        entry.pending_offline = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            tracker.finalize_offline(user_id, generation);
        }));
    }

    /// Complete an offline transition scheduled under `generation`
    ///
    /// Stale generations (the user reconnected in between) are ignored.
    fn finalize_offline(&self, user_id: UserId, generation: u64) {
        let mut users = lock(&self.users);
        let Some(entry) = users.get_mut(&user_id) else {
            return;
        };

        if entry.generation != generation
            || entry.presence.active_connections > 0
            || !entry.presence.online
        {
            return;
        }

        let now = OffsetDateTime::now_utc();
        entry.pending_offline = None;
        entry.presence.online = false;
        entry.presence.last_seen = Some(now);

        self.publish(PresenceChange {
            user_id,
            role: entry.presence.role,
            status: PresenceStatus::Offline,
            at: now,
        });
    }

    fn publish(&self, change: PresenceChange) {
        tracing::info!(
            user_id = %change.user_id,
            status = ?change.status,
            "Presence changed"
        );
        if self.changes.send(change).is_err() {
            tracing::warn!("Presence change dropped, no listener");
        }
    }

    /// Users currently shown as online
    pub fn online_users(&self) -> HashSet<UserId> {
        lock(&self.users)
            .values()
            .filter(|entry| entry.presence.online)
            .map(|entry| entry.presence.user_id)
            .collect()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        lock(&self.users)
            .get(user_id)
            .is_some_and(|entry| entry.presence.online)
    }

    pub fn get(&self, user_id: &UserId) -> Option<UserPresence> {
        lock(&self.users).get(user_id).map(|entry| entry.presence.clone())
    }

    /// Presence of every online user
    pub fn snapshot(&self) -> Vec<UserPresence> {
        lock(&self.users)
            .values()
            .filter(|entry| entry.presence.online)
            .map(|entry| entry.presence.clone())
            .collect()
    }

    /// Forget offline users last seen more than `retention` before `now`
    pub fn prune(&self, retention: Duration, now: OffsetDateTime) -> usize {
        let mut users = lock(&self.users);
        let before = users.len();

        users.retain(|_, entry| {
            let presence = &entry.presence;
            if presence.online || presence.active_connections > 0 {
                return true;
            }
            match presence.last_seen {
                Some(last_seen) => now - last_seen <= retention,
                None => true,
            }
        });

        before - users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_first_connection_goes_online() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        let user = UserId::new();

        tracker.connection_opened(user, Role::Consultant);
        tracker.connection_opened(user, Role::Consultant);

        let change = rx.try_recv().unwrap();
        assert_eq!(change.status, PresenceStatus::Online);
        assert_eq!(change.user_id, user);
        // Second tab is not a transition
        assert!(rx.try_recv().is_err());

        assert!(tracker.is_online(&user));
        assert_eq!(tracker.get(&user).unwrap().active_connections, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_after_grace_window() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        let user = UserId::new();

        tracker.connection_opened(user, Role::Consultant);
        rx.recv().await.unwrap();

        tracker.connection_closed(user);
        // Still visible during the grace window
        assert!(tracker.is_online(&user));

        tokio::time::sleep(GRACE + Duration::from_millis(1)).await;
        let change = rx.recv().await.unwrap();
        assert_eq!(change.status, PresenceStatus::Offline);
        assert!(!tracker.is_online(&user));
        assert!(tracker.get(&user).unwrap().last_seen.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_inside_grace_emits_nothing() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        let user = UserId::new();

        tracker.connection_opened(user, Role::Consultant);
        rx.recv().await.unwrap();

        tracker.connection_closed(user);
        tokio::time::sleep(Duration::from_secs(2)).await;
        tracker.connection_opened(user, Role::Consultant);

        tokio::time::sleep(GRACE * 3).await;
        assert!(rx.try_recv().is_err());
        assert!(tracker.is_online(&user));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_tab_only_triggers_offline() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        let user = UserId::new();

        tracker.connection_opened(user, Role::Manager);
        tracker.connection_opened(user, Role::Manager);
        rx.recv().await.unwrap();

        tracker.connection_closed(user);
        tokio::time::sleep(GRACE * 2).await;
        assert!(rx.try_recv().is_err());
        assert!(tracker.is_online(&user));

        tracker.connection_closed(user);
        tokio::time::sleep(GRACE * 2).await;
        assert_eq!(rx.try_recv().unwrap().status, PresenceStatus::Offline);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_zero_grace_goes_offline_immediately() {
        let (tracker, mut rx) = PresenceTracker::new(Duration::ZERO);
        let user = UserId::new();

        tracker.connection_opened(user, Role::Consultant);
        tracker.connection_closed(user);

        assert_eq!(rx.try_recv().unwrap().status, PresenceStatus::Online);
        assert_eq!(rx.try_recv().unwrap().status, PresenceStatus::Offline);
        assert!(tracker.online_users().is_empty());
    }

    #[tokio::test]
    async fn test_online_users_follows_connection_counts() {
        let (tracker, _rx) = PresenceTracker::new(Duration::ZERO);
        let alice = UserId::new();
        let bob = UserId::new();

        // (user, open?) sequence
        let steps = [
            (alice, true),
            (bob, true),
            (alice, true),
            (alice, false),
            (bob, false),
            (alice, false),
            (bob, true),
        ];

        let mut counts: HashMap<UserId, usize> = HashMap::new();
        for (user, open) in steps {
            let count = counts.entry(user).or_default();
            if open {
                *count += 1;
                tracker.connection_opened(user, Role::Consultant);
            } else {
                *count -= 1;
                tracker.connection_closed(user);
            }

            let expected: HashSet<UserId> = counts
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(user, _)| *user)
                .collect();
            assert_eq!(tracker.online_users(), expected);
        }
    }

    #[tokio::test]
    async fn test_closing_unknown_user_is_noop() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        tracker.connection_closed(UserId::new());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_prune_keeps_online_and_recent() {
        let (tracker, _rx) = PresenceTracker::new(Duration::ZERO);
        let online = UserId::new();
        let gone = UserId::new();

        tracker.connection_opened(online, Role::Consultant);
        tracker.connection_opened(gone, Role::Consultant);
        tracker.connection_closed(gone);

        let retention = Duration::from_secs(3600);
        let now = OffsetDateTime::now_utc();
        assert_eq!(tracker.prune(retention, now), 0);
        assert_eq!(tracker.prune(retention, now + time::Duration::hours(2)), 1);
        assert!(tracker.get(&gone).is_none());
        assert!(tracker.get(&online).is_some());
    }
}

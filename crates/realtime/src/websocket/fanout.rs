//! Event fanout engine
//!
//! Turns domain events from CRM producers into envelopes and routes them to
//! the right topics:
//!
//! | Event               | Topics                                   | Skips actor |
//! |---------------------|------------------------------------------|-------------|
//! | `LeadStatusChanged` | `lead:<id>`, `role:consultant`           | yes         |
//! | `NewMessage`        | `lead:<id>`, `user:<assigned consultant>`| no          |
//! | `TypingState`       | `lead:<id>`                              | yes         |
//! | `Notification`      | `user:<target>`                          | no          |
//!
//! Delivery is at-most-once. Producers get no result back.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use tripdesk_shared::{Role, Topic};

use super::connection::Connection;
use super::events::{
    ChatMessagePayload, DomainEvent, Envelope, LeadStatusPayload, ServerEvent, TypingPayload,
};
use super::registry::ConnectionRegistry;
use super::room::{BroadcastOptions, DeliveryReport, TopicRouter};
use super::shutdown_signalled;

/// Where a domain event goes and what it looks like on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutPlan {
    pub topics: Vec<Topic>,
    pub options: BroadcastOptions,
    pub event: ServerEvent,
}

impl FanoutPlan {
    pub fn for_event(event: DomainEvent) -> Self {
        let options = match event.actor() {
            Some(actor) => BroadcastOptions::excluding_user(actor),
            None => BroadcastOptions::default(),
        };

        let (topics, event) = match event {
            DomainEvent::LeadStatusChanged {
                lead_id,
                actor_id,
                previous_status,
                status,
            } => (
                vec![Topic::Lead(lead_id), Topic::Role(Role::Consultant)],
                ServerEvent::LeadStatusChanged(LeadStatusPayload {
                    lead_id,
                    previous_status,
                    status,
                    changed_by: actor_id,
                }),
            ),
            DomainEvent::NewMessage {
                lead_id,
                assigned_consultant_id,
                message,
            } => (
                vec![Topic::Lead(lead_id), Topic::User(assigned_consultant_id)],
                ServerEvent::NewMessage(ChatMessagePayload { lead_id, message }),
            ),
            DomainEvent::TypingState {
                lead_id,
                actor_id,
                is_typing,
            } => (
                vec![Topic::Lead(lead_id)],
                ServerEvent::UserTyping(TypingPayload {
                    lead_id,
                    user_id: actor_id,
                    is_typing,
                }),
            ),
            DomainEvent::Notification {
                target_user_id,
                notification,
            } => (
                vec![Topic::User(target_user_id)],
                ServerEvent::NotificationNew(notification),
            ),
        };

        Self {
            topics,
            options,
            event,
        }
    }
}

/// Deliver to several topics at once
///
/// `user:<id>` topics are resolved through the registry so every tab the
/// user has open is reached, whatever it subscribed to.
pub(crate) fn route(
    registry: &ConnectionRegistry,
    router: &TopicRouter,
    topics: &[Topic],
    envelope: &Envelope,
    options: BroadcastOptions,
) -> DeliveryReport {
    let mut user_connections: Vec<Arc<Connection>> = Vec::new();
    for topic in topics {
        if let Topic::User(user_id) = topic {
            user_connections.extend(registry.user_connections(user_id));
        }
    }

    router.broadcast_many(topics, user_connections, envelope, options)
}

/// Routes domain events to connected clients
#[derive(Clone)]
pub struct EventFanout {
    registry: Arc<ConnectionRegistry>,
    router: Arc<TopicRouter>,
}

impl EventFanout {
    pub fn new(registry: Arc<ConnectionRegistry>, router: Arc<TopicRouter>) -> Self {
        Self { registry, router }
    }

    /// Deliver one event now
    ///
    /// Per-recipient failures are logged inside the router; this never fails.
    pub fn dispatch(&self, event: DomainEvent) -> DeliveryReport {
        let plan = FanoutPlan::for_event(event);
        let envelope = Envelope::new(plan.event);

        let report = route(&self.registry, &self.router, &plan.topics, &envelope, plan.options);

        if report.failed > 0 {
            tracing::warn!(
                event_type = envelope.kind(),
                delivered = report.delivered,
                failed = report.failed,
                "Domain event partially delivered"
            );
        } else {
            tracing::debug!(
                event_type = envelope.kind(),
                delivered = report.delivered,
                "Domain event delivered"
            );
        }

        report
    }

    /// Run the engine on its own task, fed by the returned handle
    ///
    /// Events are dispatched one at a time in the order they were emitted.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> (FanoutHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<DomainEvent>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_signalled(&mut shutdown) => break,
                    event = rx.recv() => match event {
                        Some(event) => {
                            self.dispatch(event);
                        }
                        None => break,
                    },
                }
            }
            tracing::info!("Fanout engine stopped");
        });

        (FanoutHandle { tx }, task)
    }
}

/// Producer-side handle: fire-and-forget `emit`
#[derive(Clone)]
pub struct FanoutHandle {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl FanoutHandle {
    pub fn emit(&self, event: DomainEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Fanout engine is not running, domain event dropped");
        }
    }
}

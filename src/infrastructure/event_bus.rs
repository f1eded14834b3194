// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for Broker Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Enables real-time event streaming to dashboards, adapters, and the
// health supervisor. In-memory only: events are lost on restart; the
// durable audit trail is the replayable record.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::events::BrokerEvent;

/// Event bus for publishing and subscribing to broker events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<BrokerEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish a broker event to all subscribers
    pub fn publish(&self, event: BrokerEvent) {
        // send() returns the number of receivers; a bus with no subscribers
        // is not an error
        let _receiver_count = self.sender.send(event).unwrap_or(0);
    }

    /// Subscribe to all broker events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a specific workspace
    /// Useful for streaming one workspace's activity to a dashboard pane
    pub fn subscribe_workspace(&self, workspace_id: impl Into<String>) -> WorkspaceEventReceiver {
        WorkspaceEventReceiver {
            receiver: self.sender.subscribe(),
            workspace_id: workspace_id.into(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all broker events
pub struct EventReceiver {
    receiver: broadcast::Receiver<BrokerEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until event is available)
    pub async fn recv(&mut self) -> Result<BrokerEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<BrokerEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for workspace-specific events (filtered)
pub struct WorkspaceEventReceiver {
    receiver: broadcast::Receiver<BrokerEvent>,
    workspace_id: String,
}

impl WorkspaceEventReceiver {
    /// Receive the next event concerning the subscribed workspace.
    /// Events with no workspace affinity (health, reconnects) are skipped.
    pub async fn recv(&mut self) -> Result<BrokerEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;

            if event.workspace_id() == Some(self.workspace_id.as_str()) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

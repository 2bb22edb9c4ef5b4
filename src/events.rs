//! Typed lifecycle events published by the throttling core.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::throttle_config::ThrottleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    QueueFull,
    QueueCleared,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ThrottleEvent {
    #[serde(rename = "transaction:processed")]
    Processed {
        id: String,
        success: bool,
        immediate: bool,
    },
    #[serde(rename = "transaction:failed")]
    Failed { id: String, error: String },
    #[serde(rename = "transaction:queued")]
    Queued { id: String, queue_position: usize },
    #[serde(rename = "transaction:rejected")]
    Rejected { id: String, reason: RejectReason },
    #[serde(rename = "config:updated")]
    ConfigUpdated { config: ThrottleConfig },
}

impl ThrottleEvent {
    /// Wire name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            ThrottleEvent::Processed { .. } => "transaction:processed",
            ThrottleEvent::Failed { .. } => "transaction:failed",
            ThrottleEvent::Queued { .. } => "transaction:queued",
            ThrottleEvent::Rejected { .. } => "transaction:rejected",
            ThrottleEvent::ConfigUpdated { .. } => "config:updated",
        }
    }
}

/// Fan-out of [`ThrottleEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ThrottleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ThrottleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn emit(&self, event: ThrottleEvent) {
        tracing::trace!(event = event.name(), "emitting throttle event");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

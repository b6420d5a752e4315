//! Typed task event stream.
//!
//! Events go out over a `tokio::sync::broadcast` channel. Publishing never
//! waits on subscribers: one that falls behind loses the oldest events and
//! is told how many it missed.

use std::collections::HashSet;

use batchsim_core::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Submitted,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
    CacheHit,
    CacheMiss,
    /// A result could not be persisted; the task itself still succeeded.
    CacheWarning,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Publishing side, owned by the scheduler.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, task_id: TaskId, kind: EventKind, payload: serde_json::Value) {
        // No subscribers is not an error.
        let _ = self.tx.send(TaskEvent {
            task_id,
            kind,
            payload,
            timestamp: Utc::now(),
        });
    }

    /// Subscribe to the given kinds; an empty set means every kind.
    pub fn subscribe(&self, kinds: impl IntoIterator<Item = EventKind>) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side handed to a subscriber.
pub struct EventSubscription {
    rx: broadcast::Receiver<TaskEvent>,
    kinds: HashSet<EventKind>,
}

impl EventSubscription {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    /// Wait for the next matching event. `None` once the scheduler is gone.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(event.kind) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(event.kind) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged, skipping ahead");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every buffered matching event.
    pub fn drain(&mut self) -> Vec<TaskEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

//! Batch selection.
//!
//! The highest-priority queued task anchors the batch. Following tasks join
//! while they target the same model, sit within one priority level of the
//! anchor and the batch has room. Selection stops at the first task that
//! doesn't fit; skipping ahead would starve it.

use batchsim_core::{Parameters, Priority, TaskId};

use super::backlog::{Backlog, BacklogEntry};
use super::types::CancelFlag;

/// One task inside a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub task_id: TaskId,
    pub parameters: Parameters,
    pub cancel: CancelFlag,
}

/// Tasks sent to the backend together. Lives for one dispatch cycle.
#[derive(Debug, Clone)]
pub struct Batch {
    pub model_id: String,
    /// Priority of the anchor task.
    pub priority: Priority,
    pub items: Vec<BatchItem>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.items.iter().map(|i| i.task_id).collect()
    }
}

/// Pop the next batch of compatible entries off the backlog.
///
/// Returns an empty vec when the backlog is empty.
pub fn select_batch(backlog: &mut Backlog, max_batch_size: usize) -> Vec<BacklogEntry> {
    let Some(anchor) = backlog.pop() else {
        return Vec::new();
    };

    let mut selected = vec![anchor];
    while selected.len() < max_batch_size {
        let anchor = &selected[0];
        let compatible = match backlog.peek() {
            Some(next) => {
                next.model_id == anchor.model_id && next.priority.distance(anchor.priority) <= 1
            }
            None => false,
        };
        if !compatible {
            break;
        }
        match backlog.pop() {
            Some(next) => selected.push(next),
            None => break,
        }
    }
    selected
}

use std::collections::{BTreeMap, HashMap};

use batchsim_core::{Priority, TaskId};

/// Ordering key: priority first, then submission sequence (FIFO).
type BacklogKey = (Priority, u64);

/// A queued task as the batch optimizer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogEntry {
    pub task_id: TaskId,
    pub model_id: String,
    pub priority: Priority,
    /// Monotonic submission sequence, breaks priority ties.
    pub sequence: u64,
}

impl BacklogEntry {
    fn key(&self) -> BacklogKey {
        (self.priority, self.sequence)
    }
}

/// Priority queue of queued tasks with removal by id.
///
/// Not synchronised; the scheduler guards it with its state lock.
#[derive(Debug, Default)]
pub struct Backlog {
    queue: BTreeMap<BacklogKey, BacklogEntry>,
    positions: HashMap<TaskId, BacklogKey>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: BacklogEntry) {
        let key = entry.key();
        if let Some(old) = self.positions.insert(entry.task_id, key) {
            self.queue.remove(&old);
        }
        self.queue.insert(key, entry);
    }

    /// Next entry in priority order, without removing it.
    pub fn peek(&self) -> Option<&BacklogEntry> {
        self.queue.values().next()
    }

    pub fn pop(&mut self) -> Option<BacklogEntry> {
        let (_, entry) = self.queue.pop_first()?;
        self.positions.remove(&entry.task_id);
        Some(entry)
    }

    /// Remove a specific task (cancellation).
    pub fn remove(&mut self, task_id: &TaskId) -> Option<BacklogEntry> {
        let key = self.positions.remove(task_id)?;
        self.queue.remove(&key)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.positions.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued task count per priority level.
    pub fn depth_by_priority(&self) -> HashMap<Priority, usize> {
        let mut depth = HashMap::new();
        for (priority, _) in self.queue.keys() {
            *depth.entry(*priority).or_default() += 1;
        }
        depth
    }
}

// Task Registry - the only shared mutable state of the task system
//
// - Owns every task record; callers only ever see cloned snapshots
// - All mutation goes through `update`, a closure applied under the write lock
// - parking_lot guards are !Send, so no guard can live across an emission

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::bridge::ContextBridge;
use super::progress::ProgressTracker;
use super::types::{TaskFilter, TaskId, TaskKind, TaskOutcome, TaskSnapshot, TaskStats, TaskStatus};
use crate::error::{TaskError, TaskResult};
use crate::events::TaskEvent;

/// Live task state, never handed out directly
pub(crate) struct TaskRecord {
    pub(crate) snapshot: TaskSnapshot,
    /// Set by the first terminal emission; guards exactly-once delivery
    pub(crate) completion_emitted: bool,
    pub(crate) tracker: ProgressTracker,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) bridge: Arc<ContextBridge>,
}

impl TaskRecord {
    pub(crate) fn new(
        id: TaskId,
        kind: TaskKind,
        bridge: Arc<ContextBridge>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            snapshot: TaskSnapshot::new(id, kind),
            completion_emitted: false,
            tracker: ProgressTracker::default(),
            cancel_token,
            bridge,
        }
    }

    /// Pending -> Running; returns the start event, or None if the task
    /// already left `pending`
    pub(crate) fn start(&mut self) -> Option<TaskEvent> {
        if !self.snapshot.status.can_transition_to(TaskStatus::Running) {
            return None;
        }
        self.snapshot.status = TaskStatus::Running;
        self.snapshot.started_at = Some(Utc::now());
        self.snapshot.message = "Running".to_string();

        Some(TaskEvent::TaskStarted {
            id: self.snapshot.id,
            kind: self.snapshot.kind,
        })
    }

    /// Apply a terminal outcome once. Returns the events to emit, in order;
    /// empty when the task was already finalized.
    pub(crate) fn finalize(&mut self, outcome: TaskOutcome) -> Vec<TaskEvent> {
        let id = self.snapshot.id;
        let target = outcome.status();

        if self.completion_emitted || !self.snapshot.status.can_transition_to(target) {
            return Vec::new();
        }

        self.completion_emitted = true;
        self.snapshot.status = target;
        self.snapshot.finished_at = Some(Utc::now());

        match outcome {
            TaskOutcome::Completed(stats) => {
                let mut events = Vec::with_capacity(2);
                self.snapshot.progress = 100;
                if self.tracker.last_emitted_progress() < Some(100) {
                    events.push(TaskEvent::ProgressUpdate {
                        id,
                        progress: 100,
                        message: self.snapshot.message.clone(),
                    });
                }
                self.snapshot.message = "Completed".to_string();
                self.snapshot.stats = Some(stats.clone());
                events.push(TaskEvent::TaskCompleted { id, stats });
                events
            }
            TaskOutcome::Failed(error) => {
                self.snapshot.message = error.clone();
                self.snapshot.error = Some(error.clone());
                vec![TaskEvent::TaskFailed { id, error }]
            }
            TaskOutcome::Cancelled => {
                self.snapshot.message = "Cancelled".to_string();
                vec![TaskEvent::TaskCancelled { id }]
            }
        }
    }
}

/// Process-wide map from task id to task record
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, record: TaskRecord) {
        let id = record.snapshot.id;
        self.tasks.write().insert(id, record);
        debug!("Task {} registered", id);
    }

    /// Deep copy of a task's current state
    pub fn get(&self, id: TaskId) -> TaskResult<TaskSnapshot> {
        self.tasks
            .read()
            .get(&id)
            .map(|record| record.snapshot.clone())
            .ok_or(TaskError::NotFound(id))
    }

    /// Snapshots matching the filter, oldest first
    pub fn list(&self, filter: TaskFilter) -> Vec<TaskSnapshot> {
        let mut tasks: Vec<TaskSnapshot> = self
            .tasks
            .read()
            .values()
            .map(|record| &record.snapshot)
            .filter(|snapshot| filter.matches(snapshot))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Apply a mutation under the registry lock
    pub(crate) fn update<R>(
        &self,
        id: TaskId,
        mutator: impl FnOnce(&mut TaskRecord) -> R,
    ) -> TaskResult<R> {
        let mut tasks = self.tasks.write();
        let record = tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        Ok(mutator(record))
    }

    pub(crate) fn bridge(&self, id: TaskId) -> TaskResult<Arc<ContextBridge>> {
        self.tasks
            .read()
            .get(&id)
            .map(|record| record.bridge.clone())
            .ok_or(TaskError::NotFound(id))
    }

    /// Ids of all tasks that are pending or running
    pub fn active_ids(&self) -> Vec<TaskId> {
        self.tasks
            .read()
            .values()
            .filter(|record| record.snapshot.status.is_active())
            .map(|record| record.snapshot.id)
            .collect()
    }

    /// Per-status counts
    pub fn counts(&self) -> TaskStats {
        let tasks = self.tasks.read();
        let mut stats = TaskStats::default();

        for record in tasks.values() {
            match record.snapshot.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }

        stats
    }

    /// Remove terminal tasks that finished before `cutoff`
    pub fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.tasks.write().retain(|_, record| {
            let expired = record.snapshot.status.is_terminal()
                && record
                    .snapshot
                    .finished_at
                    .map(|finished| finished < cutoff)
                    .unwrap_or(false);
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::completion::CompletionBroadcaster;
use super::registry::TaskRegistry;
use super::types::{TaskId, TaskOutcome};
use crate::error::TaskResult;
use crate::events::{EventHub, TaskEvent};

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAck {
    /// Flag set; the worker observes it on its next check
    Requested,
    /// Flag was already set by an earlier request
    AlreadyRequested,
    /// Task is terminal, nothing to do
    AlreadyFinished,
}

/// Per-task cooperative cancel flags plus one process-wide emergency flag.
///
/// Cancellation is cooperative: a routine that never checks `is_cancelled`
/// keeps running until it returns, even though its task is already marked
/// `cancelled` after an emergency stop.
pub struct CancellationController {
    emergency: AtomicBool,
    registry: TaskRegistry,
    completion: CompletionBroadcaster,
    hub: Arc<EventHub>,
}

impl CancellationController {
    pub fn new(registry: TaskRegistry, completion: CompletionBroadcaster, hub: Arc<EventHub>) -> Self {
        Self {
            emergency: AtomicBool::new(false),
            registry,
            completion,
            hub,
        }
    }

    /// Emergency flag first, then the task's own flag
    pub fn is_cancelled(&self, token: &CancellationToken) -> bool {
        self.is_emergency_active() || token.is_cancelled()
    }

    pub fn is_emergency_active(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    /// Set the cooperative flag of one task; idempotent
    pub fn request_cancel(&self, id: TaskId) -> TaskResult<CancelAck> {
        let ack = self.registry.update(id, |record| {
            if record.snapshot.status.is_terminal() {
                return CancelAck::AlreadyFinished;
            }
            if record.snapshot.cancel_requested {
                return CancelAck::AlreadyRequested;
            }
            record.snapshot.cancel_requested = true;
            record.snapshot.message = "Cancellation requested".to_string();
            record.cancel_token.cancel();
            CancelAck::Requested
        })?;

        match ack {
            CancelAck::Requested => info!("🛑 Cancellation requested for task {}", id),
            CancelAck::AlreadyRequested => info!("Task {} already has a pending cancel request", id),
            CancelAck::AlreadyFinished => info!("Task {} already finished, cancel ignored", id),
        }
        Ok(ack)
    }

    /// Flag and signal one task for an emergency stop; false when it is
    /// no longer in the registry
    fn signal_cancel(&self, id: TaskId) -> bool {
        match self.registry.update(id, |record| {
            record.snapshot.cancel_requested = true;
            record.cancel_token.cancel();
        }) {
            Ok(()) => true,
            Err(e) => {
                // Purged between the snapshot and now
                debug!("Emergency stop skipped task {}: {}", id, e);
                false
            }
        }
    }

    /// Cancel everything that is pending or running and keep cancelling new
    /// tasks until `reset_emergency`. Returns the number of tasks this call
    /// moved to `cancelled`.
    pub async fn emergency_stop(&self) -> usize {
        if self.emergency.swap(true, Ordering::SeqCst) {
            warn!("Emergency stop requested while already active");
        }

        let active = self.registry.active_ids();
        info!("🚨 Emergency stop: cancelling {} active tasks", active.len());

        let mut count = 0;
        for id in active {
            if !self.signal_cancel(id) {
                continue;
            }

            match self.completion.finalize(id, TaskOutcome::Cancelled).await {
                Ok(true) => count += 1,
                // Finished on its own between the snapshot and now
                Ok(false) => {}
                Err(e) => warn!("Emergency stop skipped task {}: {}", id, e),
            }
        }

        if let Err(e) = self.hub.publish(TaskEvent::EmergencyStopComplete { count }).await {
            warn!("Could not announce emergency stop: {}", e);
        }
        info!("🚨 Emergency stop complete: {} tasks cancelled", count);

        count
    }

    /// Clear the emergency flag; only ever done explicitly
    pub fn reset_emergency(&self) -> bool {
        let was_active = self.emergency.swap(false, Ordering::SeqCst);
        if was_active {
            info!("Emergency stop reset");
        }
        was_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHubConfig;
    use crate::tasks::bridge::ContextBridge;
    use crate::tasks::registry::TaskRecord;
    use crate::tasks::types::{TaskKind, TaskStatus};
    use crate::error::TaskError;
    use uuid::Uuid;

    struct Fixture {
        hub: Arc<EventHub>,
        registry: TaskRegistry,
        controller: CancellationController,
    }

    fn fixture() -> Fixture {
        let hub = Arc::new(EventHub::new(EventHubConfig::default()));
        let registry = TaskRegistry::new();
        let completion = CompletionBroadcaster::new(registry.clone());
        let controller = CancellationController::new(registry.clone(), completion, hub.clone());
        Fixture { hub, registry, controller }
    }

    fn add_task(f: &Fixture, running: bool) -> (TaskId, CancellationToken) {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let bridge = Arc::new(ContextBridge::capture(id, &f.hub).unwrap());
        let mut record = TaskRecord::new(id, TaskKind::Download, bridge, token.clone());
        if running {
            record.start();
        }
        f.registry.insert(record);
        (id, token)
    }

    #[tokio::test]
    async fn test_request_cancel_is_idempotent() {
        let f = fixture();
        let (id, token) = add_task(&f, true);

        assert_eq!(f.controller.request_cancel(id).unwrap(), CancelAck::Requested);
        let after_first = f.registry.get(id).unwrap();
        assert_eq!(f.controller.request_cancel(id).unwrap(), CancelAck::AlreadyRequested);
        let after_second = f.registry.get(id).unwrap();

        assert!(token.is_cancelled());
        assert!(f.controller.is_cancelled(&token));
        assert_eq!(after_first, after_second);
        // Cooperative: status only changes once the worker reacts
        assert_eq!(after_second.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_request_cancel_on_terminal_is_noop() {
        let f = fixture();
        let (id, token) = add_task(&f, true);
        f.registry
            .update(id, |r| r.finalize(TaskOutcome::Failed("x".into())))
            .unwrap();

        assert_eq!(f.controller.request_cancel(id).unwrap(), CancelAck::AlreadyFinished);
        assert!(!token.is_cancelled());
        assert!(!f.registry.get(id).unwrap().cancel_requested);
    }

    #[tokio::test]
    async fn test_request_cancel_unknown_task() {
        let f = fixture();
        assert!(matches!(
            f.controller.request_cancel(Uuid::new_v4()),
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_emergency_stop_cancels_active_tasks() {
        let f = fixture();
        let mut rx = f.hub.subscribe();
        let (a, token_a) = add_task(&f, true);
        let (b, _) = add_task(&f, true);
        let (c, _) = add_task(&f, false);
        let (done, _) = add_task(&f, true);
        f.registry
            .update(done, |r| r.finalize(TaskOutcome::Cancelled))
            .unwrap();

        let count = f.controller.emergency_stop().await;
        assert_eq!(count, 3);
        for id in [a, b, c] {
            assert_eq!(f.registry.get(id).unwrap().status, TaskStatus::Cancelled);
        }
        assert!(token_a.is_cancelled());

        let mut cancelled = 0;
        loop {
            match rx.recv().await.unwrap() {
                TaskEvent::TaskCancelled { .. } => cancelled += 1,
                TaskEvent::EmergencyStopComplete { count } => {
                    assert_eq!(count, 3);
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(cancelled, 3);
    }

    #[tokio::test]
    async fn test_signal_cancel_skips_purged_task() {
        let f = fixture();
        let (id, token) = add_task(&f, true);

        assert!(f.controller.signal_cancel(id));
        assert!(token.is_cancelled());
        assert!(f.registry.get(id).unwrap().cancel_requested);

        assert!(!f.controller.signal_cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_emergency_flag_covers_new_tokens_until_reset() {
        let f = fixture();
        f.controller.emergency_stop().await;

        let fresh = CancellationToken::new();
        assert!(f.controller.is_cancelled(&fresh));
        assert!(f.controller.is_emergency_active());

        assert!(f.controller.reset_emergency());
        assert!(!f.controller.is_cancelled(&fresh));
        assert!(!f.controller.reset_emergency());
    }
}

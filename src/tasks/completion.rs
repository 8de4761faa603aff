use tracing::{debug, error, info};

use super::registry::TaskRegistry;
use super::types::{TaskId, TaskOutcome};
use crate::error::TaskResult;
use crate::events::TaskEvent;

/// Finalizes tasks and guarantees a single terminal event per task.
///
/// Worker returns, panics, cancellation and emergency stop all funnel through
/// `finalize`; only the first call for an id has any effect.
#[derive(Clone)]
pub struct CompletionBroadcaster {
    registry: TaskRegistry,
}

impl CompletionBroadcaster {
    pub fn new(registry: TaskRegistry) -> Self {
        Self { registry }
    }

    /// Apply the outcome and emit its terminal event. Returns `false` when the
    /// task had already been finalized (a no-op, not an error).
    pub async fn finalize(&self, id: TaskId, outcome: TaskOutcome) -> TaskResult<bool> {
        let bridge = self.registry.bridge(id)?;
        let _gate = bridge.lock().await;

        let status = outcome.status();
        let events = self.registry.update(id, |record| record.finalize(outcome))?;

        if events.is_empty() {
            debug!("Task {} already finalized, ignoring {} outcome", id, status);
            return Ok(false);
        }

        for event in events {
            if let TaskEvent::TaskFailed { error: ref message, .. } = event {
                error!("Task {} failed: {}", id, message);
            }
            bridge.deliver(event).await;
        }
        info!("Task {} finished: {}", id, status);

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventHub, EventHubConfig};
    use crate::tasks::bridge::ContextBridge;
    use crate::tasks::registry::TaskRecord;
    use crate::tasks::types::{TaskKind, TaskStatus};
    use crate::error::TaskError;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn running_task(hub: &EventHub, registry: &TaskRegistry) -> TaskId {
        let id = Uuid::new_v4();
        let bridge = Arc::new(ContextBridge::capture(id, hub).unwrap());
        let mut record = TaskRecord::new(id, TaskKind::Processing, bridge, CancellationToken::new());
        record.start();
        registry.insert(record);
        id
    }

    #[tokio::test]
    async fn test_only_first_finalize_emits() {
        let hub = EventHub::new(EventHubConfig::default());
        let mut rx = hub.subscribe();
        let registry = TaskRegistry::new();
        let completion = CompletionBroadcaster::new(registry.clone());
        let id = running_task(&hub, &registry);

        assert!(completion.finalize(id, TaskOutcome::Cancelled).await.unwrap());
        assert!(!completion
            .finalize(id, TaskOutcome::Completed(json!({})))
            .await
            .unwrap());
        assert!(!completion
            .finalize(id, TaskOutcome::Failed("late".into()))
            .await
            .unwrap());

        assert_eq!(rx.recv().await.unwrap(), TaskEvent::TaskCancelled { id });
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_concurrent_finalize_emits_once() {
        let hub = EventHub::new(EventHubConfig::default());
        let mut rx = hub.subscribe();
        let registry = TaskRegistry::new();
        let completion = CompletionBroadcaster::new(registry.clone());
        let id = running_task(&hub, &registry);

        let mut handles = Vec::new();
        for i in 0..8 {
            let completion = completion.clone();
            handles.push(tokio::spawn(async move {
                let outcome = if i % 2 == 0 {
                    TaskOutcome::Cancelled
                } else {
                    TaskOutcome::Failed(format!("path {}", i))
                };
                completion.finalize(id, outcome).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let first = rx.recv().await.unwrap();
        assert!(first.is_terminal());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finalize_unknown_task() {
        let registry = TaskRegistry::new();
        let completion = CompletionBroadcaster::new(registry);
        let result = completion.finalize(Uuid::new_v4(), TaskOutcome::Cancelled).await;
        assert!(matches!(result, Err(TaskError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_outcome_recorded_when_hub_closed() {
        let hub = EventHub::new(EventHubConfig::default());
        let registry = TaskRegistry::new();
        let completion = CompletionBroadcaster::new(registry.clone());
        let id = running_task(&hub, &registry);
        hub.close();

        assert!(completion
            .finalize(id, TaskOutcome::Completed(json!({"pages": 4})))
            .await
            .unwrap());

        let snapshot = registry.get(id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.stats, Some(json!({"pages": 4})));
    }
}

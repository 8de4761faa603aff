use std::future::Future;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::warn;

use super::types::TaskId;
use crate::error::{BridgeError, TaskError, TaskResult};
use crate::events::{EventHub, TaskEvent};

/// Serving context captured when a task is created.
///
/// Holds the runtime handle of the request that created the task and a weak
/// sender into the event channel. Workers emit through the bridge only; an
/// emission that cannot re-enter the context is logged and dropped, it never
/// fails the task.
pub struct ContextBridge {
    task_id: TaskId,
    runtime: Handle,
    events: Option<mpsc::WeakSender<TaskEvent>>,
    /// Serializes "decide under registry lock, then emit" per task so events
    /// leave in the order their state changes were recorded
    gate: Mutex<()>,
}

impl ContextBridge {
    /// Capture the calling context; must run inside the serving runtime
    pub fn capture(task_id: TaskId, hub: &EventHub) -> TaskResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| TaskError::RuntimeUnavailable(e.to_string()))?;

        Ok(Self {
            task_id,
            runtime,
            events: hub.weak_sender(),
            gate: Mutex::new(()),
        })
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Runtime the task's worker runs on
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Push an event into the captured channel
    pub async fn emit(&self, event: TaskEvent) -> Result<(), BridgeError> {
        let sender = self
            .events
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| BridgeError::ContextUnavailable("event hub closed".to_string()))?;

        sender
            .send(event)
            .await
            .map_err(|e| BridgeError::ContextUnavailable(format!("event queue closed: {}", e)))
    }

    /// Emit, degrading to a log line when the context is gone
    pub async fn deliver(&self, event: TaskEvent) {
        let name = event.name();
        if let Err(e) = self.emit(event).await {
            warn!("Task {} dropped {} event: {}", self.task_id, name, e);
        }
    }

    /// Re-enter the captured runtime from a blocking worker thread.
    ///
    /// Panics if called from an async context; use it only inside
    /// `spawn_blocking` closures.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

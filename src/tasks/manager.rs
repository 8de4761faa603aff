// Task Manager - entry point of the task core
//
// - Validates and registers tasks, spawns one worker per task
// - Relays cancel / emergency stop to the Cancellation Controller
// - Limits concurrently running routines with a semaphore
// - Purges finished tasks after the retention window

use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::bridge::ContextBridge;
use super::cancel::{CancelAck, CancellationController};
use super::completion::CompletionBroadcaster;
use super::progress::{ProgressConfig, ProgressEmitter};
use super::registry::{TaskRecord, TaskRegistry};
use super::routine::{RoutineProvider, TaskContext};
use super::types::{
    TaskFilter, TaskId, TaskKind, TaskOutcome, TaskPayload, TaskSnapshot, TaskStats,
};
use super::worker::{run_task, WorkerPool};
use crate::error::TaskResult;
use crate::events::{EventHub, TaskEvent};

/// Configuration for the task manager
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Maximum number of routines running at once
    pub max_concurrent_tasks: usize,
    pub progress: ProgressConfig,
    /// How long finished tasks stay queryable; `None` keeps them forever
    pub retention: Option<Duration>,
    /// Period of the retention sweeper
    pub sweep_interval: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            progress: ProgressConfig::default(),
            retention: Some(Duration::from_secs(3600)),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

pub struct TaskManager {
    config: TaskManagerConfig,
    registry: TaskRegistry,
    hub: Arc<EventHub>,
    controller: Arc<CancellationController>,
    completion: CompletionBroadcaster,
    emitter: ProgressEmitter,
    slots: Arc<Semaphore>,
    routines: Arc<dyn RoutineProvider>,
    sweeper_running: AtomicBool,
}

impl TaskManager {
    pub fn new(
        config: TaskManagerConfig,
        hub: Arc<EventHub>,
        routines: Arc<dyn RoutineProvider>,
    ) -> Self {
        let registry = TaskRegistry::new();
        let completion = CompletionBroadcaster::new(registry.clone());
        let controller = Arc::new(CancellationController::new(
            registry.clone(),
            completion.clone(),
            hub.clone(),
        ));
        let emitter = ProgressEmitter::new(registry.clone(), config.progress.clone());
        let slots = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));

        Self {
            config,
            registry,
            hub,
            controller,
            completion,
            emitter,
            slots,
            routines,
            sweeper_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    /// Create a task from a type and raw params
    pub fn create_task(&self, kind: TaskKind, params: Value) -> TaskResult<TaskId> {
        let payload = TaskPayload::from_parts(kind, params)?;
        self.submit(payload)
    }

    /// Register a typed payload and spawn its worker.
    ///
    /// Captures the calling runtime; fails with `RuntimeUnavailable` when
    /// called outside one.
    pub fn submit(&self, payload: TaskPayload) -> TaskResult<TaskId> {
        payload.validate()?;

        let id = Uuid::new_v4();
        let kind = payload.kind();
        let bridge = Arc::new(ContextBridge::capture(id, &self.hub)?);
        let token = CancellationToken::new();
        let routine = self.routines.routine(&payload);

        self.registry
            .insert(TaskRecord::new(id, kind, bridge.clone(), token.clone()));

        let ctx = TaskContext::new(
            kind,
            self.controller.clone(),
            self.emitter.clone(),
            bridge.clone(),
            token,
        );
        let pool = WorkerPool {
            registry: self.registry.clone(),
            completion: self.completion.clone(),
            slots: self.slots.clone(),
        };
        bridge.runtime().spawn(run_task(pool, ctx, routine));

        info!("📋 Task {} created ({})", id, kind);
        Ok(id)
    }

    pub fn get_status(&self, id: TaskId) -> TaskResult<TaskSnapshot> {
        self.registry.get(id)
    }

    pub fn list(&self, filter: TaskFilter) -> Vec<TaskSnapshot> {
        self.registry.list(filter)
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            max_concurrent: self.config.max_concurrent_tasks.max(1),
            available_slots: self.slots.available_permits(),
            emergency_active: self.controller.is_emergency_active(),
            ..self.registry.counts()
        }
    }

    pub fn request_cancel(&self, id: TaskId) -> TaskResult<CancelAck> {
        self.controller.request_cancel(id)
    }

    pub async fn emergency_stop(&self) -> usize {
        self.controller.emergency_stop().await
    }

    pub fn reset_emergency(&self) -> bool {
        self.controller.reset_emergency()
    }

    pub fn is_emergency_active(&self) -> bool {
        self.controller.is_emergency_active()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.hub.subscribe()
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Finalize a task from outside its worker; no-op after the first call
    pub async fn finalize(&self, id: TaskId, outcome: TaskOutcome) -> TaskResult<bool> {
        self.completion.finalize(id, outcome).await
    }

    /// Drop finished tasks older than the retention window
    pub fn purge_expired(&self) -> usize {
        let Some(retention) = self.config.retention else {
            return 0;
        };
        let Ok(window) = chrono::Duration::from_std(retention) else {
            return 0;
        };

        let removed = self.registry.purge_finished_before(Utc::now() - window);
        if removed > 0 {
            info!("🧹 Purged {} finished tasks", removed);
        }
        removed
    }

    /// Start the periodic retention sweep; does nothing when retention is
    /// disabled or a sweeper already runs
    pub fn start_retention_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.config.retention?;
        if self.sweeper_running.swap(true, Ordering::SeqCst) {
            return None;
        }

        let manager = Arc::downgrade(self);
        let interval = self.config.sweep_interval.max(Duration::from_millis(10));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match manager.upgrade() {
                    Some(manager) => {
                        manager.purge_expired();
                    }
                    None => break,
                }
            }
            debug!("Retention sweeper stopped");
        });

        info!("🧹 Retention sweeper started (interval: {:?})", interval);
        Some(handle)
    }
}

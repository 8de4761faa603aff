use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::completion::CompletionBroadcaster;
use super::registry::TaskRegistry;
use super::routine::{TaskContext, TaskRoutine};
use super::types::{TaskId, TaskOutcome};
use crate::error::RoutineError;

/// Shared handles a worker needs besides its own context
#[derive(Clone)]
pub(crate) struct WorkerPool {
    pub(crate) registry: TaskRegistry,
    pub(crate) completion: CompletionBroadcaster,
    pub(crate) slots: Arc<Semaphore>,
}

/// Body of the per-task worker: wait for a slot, start, run, finalize.
///
/// Every exit path ends in `finalize`, so a task can never be left active
/// once its worker is gone.
pub(crate) async fn run_task(pool: WorkerPool, ctx: TaskContext, routine: Arc<dyn TaskRoutine>) {
    let id = ctx.task_id();
    let bridge = ctx.bridge().clone();

    // A free slot wins over a pending cancel so a task created during an
    // emergency still runs and observes the flag itself
    let permit = tokio::select! {
        biased;
        permit = pool.slots.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(e) => {
                warn!("Task {} could not acquire a worker slot: {}", id, e);
                finish(&pool, id, TaskOutcome::Failed(format!("worker pool closed: {}", e))).await;
                return;
            }
        },
        _ = ctx.cancelled() => {
            info!("Task {} cancelled while waiting for a worker slot", id);
            finish(&pool, id, TaskOutcome::Cancelled).await;
            return;
        }
    };

    {
        let _gate = bridge.lock().await;
        let started = pool.registry.update(id, |record| record.start()).ok().flatten();
        match started {
            Some(event) => bridge.deliver(event).await,
            None => {
                debug!("Task {} finalized before it started, skipping routine", id);
                return;
            }
        }
    }
    info!("▶️ Task {} started ({})", id, ctx.kind());

    let result = AssertUnwindSafe(routine.run(ctx.clone())).catch_unwind().await;
    drop(permit);

    let outcome = match result {
        Ok(Ok(stats)) => TaskOutcome::Completed(stats),
        Ok(Err(RoutineError::Cancelled)) => TaskOutcome::Cancelled,
        Ok(Err(RoutineError::Failed(message))) => TaskOutcome::Failed(message),
        Err(panic) => TaskOutcome::Failed(format!("routine panicked: {}", panic_message(&*panic))),
    };

    finish(&pool, id, outcome).await;
}

async fn finish(pool: &WorkerPool, id: TaskId, outcome: TaskOutcome) {
    if let Err(e) = pool.completion.finalize(id, outcome).await {
        warn!("Task {} could not be finalized: {}", id, e);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let panic: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert_eq!(panic_message(&*panic), "index out of bounds");

        let panic: Box<dyn Any + Send> = Box::new(format!("page {}", 3));
        assert_eq!(panic_message(&*panic), "page 3");

        let panic: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*panic), "unknown panic");
    }
}

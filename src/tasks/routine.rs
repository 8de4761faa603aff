use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::bridge::ContextBridge;
use super::cancel::CancellationController;
use super::progress::ProgressEmitter;
use super::types::{TaskId, TaskKind, TaskPayload};
use crate::error::RoutineError;

/// Run contract every task type implements.
///
/// A routine must check `ctx.is_cancelled()` at least once per unit of work
/// and return `Err(RoutineError::Cancelled)` promptly when it is set. Progress
/// goes through `ctx.report_progress(done, total, message)` with
/// `done <= total`. The returned value becomes the task's `stats`.
#[async_trait]
pub trait TaskRoutine: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, RoutineError>;
}

/// Adapter turning an async closure into a routine
pub struct RoutineFn<F>(pub F);

#[async_trait]
impl<F, Fut> TaskRoutine for RoutineFn<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, RoutineError>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> Result<serde_json::Value, RoutineError> {
        (self.0)(ctx).await
    }
}

/// Shorthand for `Arc::new(RoutineFn(f))`
pub fn routine_fn<F, Fut>(f: F) -> Arc<dyn TaskRoutine>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, RoutineError>> + Send + 'static,
{
    Arc::new(RoutineFn(f))
}

/// Maps a typed payload to the routine that executes it
pub trait RoutineProvider: Send + Sync {
    fn routine(&self, payload: &TaskPayload) -> Arc<dyn TaskRoutine>;
}

impl<F> RoutineProvider for F
where
    F: Fn(&TaskPayload) -> Arc<dyn TaskRoutine> + Send + Sync,
{
    fn routine(&self, payload: &TaskPayload) -> Arc<dyn TaskRoutine> {
        self(payload)
    }
}

struct ContextInner {
    id: TaskId,
    kind: TaskKind,
    controller: Arc<CancellationController>,
    emitter: ProgressEmitter,
    bridge: Arc<ContextBridge>,
    token: CancellationToken,
}

/// Handle a routine uses to talk back to the core
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<ContextInner>,
}

impl TaskContext {
    pub(crate) fn new(
        kind: TaskKind,
        controller: Arc<CancellationController>,
        emitter: ProgressEmitter,
        bridge: Arc<ContextBridge>,
        token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: bridge.task_id(),
                kind,
                controller,
                emitter,
                bridge,
                token,
            }),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.inner.id
    }

    pub fn kind(&self) -> TaskKind {
        self.inner.kind
    }

    pub(crate) fn bridge(&self) -> &Arc<ContextBridge> {
        &self.inner.bridge
    }

    /// Report `done` of `total` units; `total == 0` updates the message only.
    /// Returns whether a `progress_update` event left.
    pub async fn report_progress(&self, done: u64, total: u64, message: impl Into<String>) -> bool {
        self.inner
            .emitter
            .report(&self.inner.bridge, done, total, message.into())
            .await
    }

    /// Emergency flag first, then this task's own flag
    pub fn is_cancelled(&self) -> bool {
        self.inner.controller.is_cancelled(&self.inner.token)
    }

    /// `Err(Cancelled)` when cancellation was requested, for use with `?`
    pub fn check_cancelled(&self) -> Result<(), RoutineError> {
        if self.is_cancelled() {
            Err(RoutineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once this task is cancelled; for `select!` around long awaits
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.token.cancelled().await
    }

    /// View for code running inside `spawn_blocking`
    pub fn blocking(&self) -> BlockingTaskContext {
        BlockingTaskContext { ctx: self.clone() }
    }
}

/// Synchronous view of a `TaskContext` that re-enters the captured runtime.
///
/// Must only be used from blocking threads; calling `report_progress` on an
/// async worker thread panics.
#[derive(Clone)]
pub struct BlockingTaskContext {
    ctx: TaskContext,
}

impl BlockingTaskContext {
    pub fn task_id(&self) -> TaskId {
        self.ctx.task_id()
    }

    pub fn report_progress(&self, done: u64, total: u64, message: impl Into<String>) -> bool {
        let message = message.into();
        self.ctx
            .bridge()
            .block_on(self.ctx.report_progress(done, total, message))
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<(), RoutineError> {
        self.ctx.check_cancelled()
    }
}

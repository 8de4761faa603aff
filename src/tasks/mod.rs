mod bridge;
mod cancel;
mod completion;
mod manager;
mod progress;
mod registry;
mod routine;
mod types;
mod worker;

pub use bridge::ContextBridge;
pub use cancel::{CancelAck, CancellationController};
pub use completion::CompletionBroadcaster;
pub use manager::{TaskManager, TaskManagerConfig};
pub use progress::{compute_progress, ProgressConfig, ProgressEmitter};
pub use registry::TaskRegistry;
pub use routine::{
    routine_fn, BlockingTaskContext, RoutineFn, RoutineProvider, TaskContext, TaskRoutine,
};
pub use types::{
    DownloadParams, ProcessingParams, ScrapeParams, SearchParams, TaskFilter, TaskId, TaskKind,
    TaskOutcome, TaskPayload, TaskSnapshot, TaskStats, TaskStatus,
};

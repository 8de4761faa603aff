use thiserror::Error;

use crate::tasks::TaskId;

/// Errors returned by the task management API
#[derive(Debug, Error)]
pub enum TaskError {
    /// Rejected at creation; the task never enters the registry
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// No async runtime to capture when the task was created
    #[error("Task runtime unavailable: {0}")]
    RuntimeUnavailable(String),
}

pub type TaskResult<T> = Result<T, TaskError>;

/// Outcome of a routine that did not produce stats
#[derive(Debug, Error)]
pub enum RoutineError {
    /// The routine observed cancellation and stopped early
    #[error("Task cancelled")]
    Cancelled,

    /// The routine failed; the message is surfaced to clients verbatim
    #[error("{0}")]
    Failed(String),
}

impl RoutineError {
    pub fn failed(message: impl Into<String>) -> Self {
        RoutineError::Failed(message.into())
    }
}

impl From<anyhow::Error> for RoutineError {
    fn from(err: anyhow::Error) -> Self {
        RoutineError::Failed(err.to_string())
    }
}

impl From<std::io::Error> for RoutineError {
    fn from(err: std::io::Error) -> Self {
        RoutineError::Failed(err.to_string())
    }
}

impl From<reqwest::Error> for RoutineError {
    fn from(err: reqwest::Error) -> Self {
        RoutineError::Failed(err.to_string())
    }
}

impl From<serde_json::Error> for RoutineError {
    fn from(err: serde_json::Error) -> Self {
        RoutineError::Failed(err.to_string())
    }
}

/// Emission-only failure; never changes a task's outcome
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Event context unavailable: {0}")]
    ContextUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_message_is_verbatim() {
        let err = RoutineError::failed("disk full: /tmp/out");
        assert_eq!(err.to_string(), "disk full: /tmp/out");

        let err: RoutineError = anyhow::anyhow!("boom at page 3").into();
        assert_eq!(err.to_string(), "boom at page 3");
    }
}

use serde::{Deserialize, Serialize};

use crate::tasks::{TaskId, TaskKind, TaskSnapshot};

/// Events pushed to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskStarted {
        id: TaskId,
        #[serde(rename = "task_type")]
        kind: TaskKind,
    },
    ProgressUpdate {
        id: TaskId,
        progress: u8,
        message: String,
    },
    TaskCompleted {
        id: TaskId,
        stats: serde_json::Value,
    },
    TaskFailed {
        id: TaskId,
        error: String,
    },
    TaskCancelled {
        id: TaskId,
    },
    EmergencyStopComplete {
        count: usize,
    },
}

impl TaskEvent {
    /// Task this event belongs to, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskEvent::TaskStarted { id, .. }
            | TaskEvent::ProgressUpdate { id, .. }
            | TaskEvent::TaskCompleted { id, .. }
            | TaskEvent::TaskFailed { id, .. }
            | TaskEvent::TaskCancelled { id } => Some(*id),
            TaskEvent::EmergencyStopComplete { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::TaskCompleted { .. }
                | TaskEvent::TaskFailed { .. }
                | TaskEvent::TaskCancelled { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::TaskStarted { .. } => "task_started",
            TaskEvent::ProgressUpdate { .. } => "progress_update",
            TaskEvent::TaskCompleted { .. } => "task_completed",
            TaskEvent::TaskFailed { .. } => "task_failed",
            TaskEvent::TaskCancelled { .. } => "task_cancelled",
            TaskEvent::EmergencyStopComplete { .. } => "emergency_stop_complete",
        }
    }
}

/// Control messages received from WebSocket clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Cancel { id: TaskId },
    EmergencyStop {},
    ResetEmergency {},
}

/// Direct replies to a single WebSocket client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientReply {
    /// Full state on connect and after a lagged receiver
    TasksSync { tasks: Vec<TaskSnapshot> },
    Ack { action: String, detail: serde_json::Value },
    Error { message: String, code: String },
}

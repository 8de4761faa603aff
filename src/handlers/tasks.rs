use crate::error::TaskError;
use crate::state::ServerState;
use crate::tasks::{CancelAck, TaskFilter, TaskId, TaskKind, TaskSnapshot, TaskStats, TaskStatus};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Body of a task creation request
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Parsed after extraction so an unknown type is `InvalidParams`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// Query params for listing tasks
#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelTaskResponse {
    pub task_id: TaskId,
    pub result: CancelAck,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmergencyStopResponse {
    pub cancelled: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmergencyResetResponse {
    /// Whether the flag was set before this call
    pub reset: bool,
}

fn task_error(e: TaskError) -> (StatusCode, String) {
    let status = match &e {
        TaskError::InvalidParams(_) => StatusCode::BAD_REQUEST,
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::RuntimeUnavailable(_) => {
            error!("Task runtime unavailable: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, e.to_string())
}

/// Create a task and start its worker
pub async fn create_task(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), (StatusCode, String)> {
    let task_id = request
        .kind
        .parse::<TaskKind>()
        .and_then(|kind| state.tasks.create_task(kind, request.params))
        .map_err(|e| {
            warn!("Rejected {} task: {}", request.kind, e);
            task_error(e)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            task_id,
            status: TaskStatus::Pending,
        }),
    ))
}

/// List tasks, optionally filtered by status and type
pub async fn list_tasks(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<TaskSnapshot>>, (StatusCode, String)> {
    let filter = TaskFilter {
        status: query
            .status
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(task_error)?,
        kind: query
            .kind
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(task_error)?,
    };

    Ok(Json(state.tasks.list(filter)))
}

pub async fn get_task(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<TaskSnapshot>, (StatusCode, String)> {
    state.tasks.get_status(task_id).map(Json).map_err(task_error)
}

/// Request cooperative cancellation of one task
pub async fn cancel_task(
    State(state): State<Arc<ServerState>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<CancelTaskResponse>, (StatusCode, String)> {
    let result = state.tasks.request_cancel(task_id).map_err(task_error)?;
    Ok(Json(CancelTaskResponse { task_id, result }))
}

/// Get registry statistics
pub async fn get_task_stats(State(state): State<Arc<ServerState>>) -> Json<TaskStats> {
    Json(state.tasks.stats())
}

/// Cancel every active task and hold new ones cancelled until reset
pub async fn emergency_stop(
    State(state): State<Arc<ServerState>>,
) -> Json<EmergencyStopResponse> {
    let cancelled = state.tasks.emergency_stop().await;
    Json(EmergencyStopResponse { cancelled })
}

pub async fn reset_emergency(
    State(state): State<Arc<ServerState>>,
) -> Json<EmergencyResetResponse> {
    let reset = state.tasks.reset_emergency();
    info!("Emergency reset requested over HTTP (was active: {})", reset);
    Json(EmergencyResetResponse { reset })
}

/// Server-Sent Events stream of task events
pub async fn task_event_stream(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut receiver = state.tasks.subscribe();

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    match serde_json::to_string(&event) {
                        Ok(data) => yield Ok(Event::default().data(data).event(event.name())),
                        Err(e) => error!("Failed to serialize event: {}", e),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("SSE client lagged, missed {} events", n);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

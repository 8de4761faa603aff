pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod routines;
pub mod state;
pub mod sync;
pub mod tasks;

pub use config::ServerConfig;
pub use events::{EventHub, EventHubConfig, TaskEvent};
pub use routines::BuiltinRoutines;
pub use state::ServerState;
pub use tasks::{TaskManager, TaskManagerConfig};

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use handlers::{
    cancel_task, create_task, emergency_stop, get_task, get_task_stats, health_check, list_tasks,
    reset_emergency, task_event_stream,
};
use sync::{handle_websocket, SyncState};

/// 1MB is plenty for task creation bodies
const MAX_API_BODY_SIZE: usize = 1024 * 1024;

/// Build the full HTTP and WebSocket router
pub fn router(state: Arc<ServerState>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/tasks", post(create_task).get(list_tasks))
        .route("/api/tasks/stats", get(get_task_stats))
        .route("/api/tasks/events", get(task_event_stream))
        .route("/api/tasks/{task_id}", get(get_task))
        .route("/api/tasks/{task_id}/cancel", post(cancel_task))
        .route("/api/emergency-stop", post(emergency_stop))
        .route("/api/emergency-stop/reset", post(reset_emergency));

    let ws_routes = Router::new()
        .route("/ws", get(handle_websocket))
        .with_state(SyncState {
            tasks: state.tasks.clone(),
        });

    let cors_origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(cors_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .merge(api_routes)
        .merge(ws_routes)
        .layer(RequestBodyLimitLayer::new(MAX_API_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::error::TaskError;
use crate::events::{ClientReply, ControlMessage};
use crate::tasks::{TaskFilter, TaskManager};

/// Shared application state for WebSocket handling
#[derive(Clone)]
pub struct SyncState {
    pub tasks: Arc<TaskManager>,
}

/// Handle WebSocket upgrade
pub async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<SyncState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Forward task events to one client and relay its control messages
async fn handle_socket(socket: WebSocket, state: SyncState) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the initial sync so no event falls in between
    let mut events = state.tasks.subscribe();
    info!("New WebSocket connection established");

    if !send_json(&mut sender, &tasks_sync(&state)).await {
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<ControlMessage>(&text) {
                            Ok(control) => handle_control_message(control, &state).await,
                            Err(e) => {
                                error!("Failed to parse message: {}", e);
                                ClientReply::Error {
                                    message: format!("Invalid message format: {}", e),
                                    code: "PARSE_ERROR".to_string(),
                                }
                            }
                        };
                        if !send_json(&mut sender, &reply).await {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!("WebSocket connection closed by client");
                        break;
                    }
                    Message::Ping(data) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    _ => {}
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !send_json(&mut sender, &event).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, missed {} events; resyncing", n);
                        if !send_json(&mut sender, &tasks_sync(&state)).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event channel closed, ending WebSocket session");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket connection terminated");
}

fn tasks_sync(state: &SyncState) -> ClientReply {
    ClientReply::TasksSync {
        tasks: state.tasks.list(TaskFilter::default()),
    }
}

async fn send_json<T: Serialize>(sender: &mut SplitSink<WebSocket, Message>, value: &T) -> bool {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            return true;
        }
    };

    match sender.send(Message::Text(json.into())).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Failed to send WebSocket message: {}", e);
            false
        }
    }
}

/// Apply one control message and build the reply for its sender
pub async fn handle_control_message(msg: ControlMessage, state: &SyncState) -> ClientReply {
    match msg {
        ControlMessage::Cancel { id } => match state.tasks.request_cancel(id) {
            Ok(result) => ClientReply::Ack {
                action: "cancel".to_string(),
                detail: json!({ "id": id, "result": result }),
            },
            Err(e @ TaskError::NotFound(_)) => ClientReply::Error {
                message: e.to_string(),
                code: "TASK_NOT_FOUND".to_string(),
            },
            Err(e) => ClientReply::Error {
                message: e.to_string(),
                code: "CANCEL_ERROR".to_string(),
            },
        },

        ControlMessage::EmergencyStop {} => {
            info!("Emergency stop requested over WebSocket");
            let cancelled = state.tasks.emergency_stop().await;
            ClientReply::Ack {
                action: "emergency_stop".to_string(),
                detail: json!({ "cancelled": cancelled }),
            }
        }

        ControlMessage::ResetEmergency {} => {
            let reset = state.tasks.reset_emergency();
            ClientReply::Ack {
                action: "reset_emergency".to_string(),
                detail: json!({ "reset": reset }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventHub, EventHubConfig};
    use crate::tasks::{routine_fn, TaskContext, TaskManagerConfig, TaskPayload, TaskRoutine};
    use uuid::Uuid;

    fn state() -> SyncState {
        let hub = Arc::new(EventHub::new(EventHubConfig::default()));
        let routine: Arc<dyn TaskRoutine> =
            routine_fn(|ctx: TaskContext| async move {
                ctx.cancelled().await;
                Err::<serde_json::Value, _>(crate::error::RoutineError::Cancelled)
            });
        let provider = move |_: &TaskPayload| routine.clone();
        SyncState {
            tasks: Arc::new(TaskManager::new(
                TaskManagerConfig::default(),
                hub,
                Arc::new(provider),
            )),
        }
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_replies_error() {
        let state = state();
        let reply = handle_control_message(ControlMessage::Cancel { id: Uuid::new_v4() }, &state).await;
        match reply {
            ClientReply::Error { code, .. } => assert_eq!(code, "TASK_NOT_FOUND"),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emergency_stop_and_reset_ack() {
        let state = state();
        state
            .tasks
            .create_task(
                crate::tasks::TaskKind::Scrape,
                json!({"urls": ["https://example.org/"]}),
            )
            .unwrap();

        let reply = handle_control_message(ControlMessage::EmergencyStop {}, &state).await;
        match reply {
            ClientReply::Ack { action, detail } => {
                assert_eq!(action, "emergency_stop");
                assert_eq!(detail, json!({"cancelled": 1}));
            }
            other => panic!("unexpected reply {:?}", other),
        }

        let reply = handle_control_message(ControlMessage::ResetEmergency {}, &state).await;
        match reply {
            ClientReply::Ack { detail, .. } => assert_eq!(detail, json!({"reset": true})),
            other => panic!("unexpected reply {:?}", other),
        }
    }
}

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::tasks::TaskManager;

/// Main server state shared across all handlers
pub struct ServerState {
    pub config: ServerConfig,
    pub tasks: Arc<TaskManager>,
    pub start_time: Instant,
}

impl ServerState {
    pub fn new(config: ServerConfig, tasks: Arc<TaskManager>) -> Self {
        Self {
            config,
            tasks,
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

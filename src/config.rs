use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::events::EventHubConfig;
use crate::tasks::{ProgressConfig, TaskManagerConfig};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    /// Maximum number of task routines running at once
    pub max_concurrent_tasks: usize,
    /// Bounded queue between workers and the event pump
    pub event_queue_capacity: usize,
    /// Per-subscriber buffer of the event fan-out
    pub event_broadcast_capacity: usize,
    /// Minimum progress increase (percent) that is always emitted
    pub progress_min_delta: u8,
    /// Minimum time between smaller progress emissions
    pub progress_min_interval_ms: u64,
    /// Seconds finished tasks are kept; 0 keeps them forever
    pub task_retention_secs: u64,
    /// Period of the retention sweeper
    pub retention_sweep_interval_secs: u64,
    /// Timeout for outbound HTTP requests made by routines
    pub http_timeout_secs: u64,
    /// CORS allowed origins (comma-separated in env var)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_addr: "127.0.0.1".to_string(),
            max_concurrent_tasks: 4,
            event_queue_capacity: 1024,
            event_broadcast_capacity: 1000,
            progress_min_delta: 1,
            progress_min_interval_ms: 250,
            task_retention_secs: 3600,
            retention_sweep_interval_secs: 60,
            http_timeout_secs: 30,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            port: lookup("TASKRELAY_PORT")
                .map(|v| v.trim().parse::<u16>().map_err(|_| ConfigError::InvalidPort))
                .transpose()?
                .unwrap_or(defaults.port),
            bind_addr: lookup("TASKRELAY_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_concurrent_tasks: parse_or(&lookup, "MAX_CONCURRENT_TASKS", defaults.max_concurrent_tasks)?,
            event_queue_capacity: parse_or(&lookup, "EVENT_QUEUE_CAPACITY", defaults.event_queue_capacity)?,
            event_broadcast_capacity: parse_or(
                &lookup,
                "EVENT_BROADCAST_CAPACITY",
                defaults.event_broadcast_capacity,
            )?,
            progress_min_delta: parse_or(&lookup, "PROGRESS_MIN_DELTA", defaults.progress_min_delta)?,
            progress_min_interval_ms: parse_or(
                &lookup,
                "PROGRESS_MIN_INTERVAL_MS",
                defaults.progress_min_interval_ms,
            )?,
            task_retention_secs: parse_or(&lookup, "TASK_RETENTION_SECS", defaults.task_retention_secs)?,
            retention_sweep_interval_secs: parse_or(
                &lookup,
                "RETENTION_SWEEP_INTERVAL_SECS",
                defaults.retention_sweep_interval_secs,
            )?,
            http_timeout_secs: parse_or(&lookup, "HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            cors_origins: lookup("CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_TASKS must be at least 1".to_string(),
            ));
        }
        if self.event_queue_capacity == 0 || self.event_broadcast_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "event channel capacities must be at least 1".to_string(),
            ));
        }
        if self.progress_min_delta > 100 {
            return Err(ConfigError::InvalidValue(
                "PROGRESS_MIN_DELTA must be between 0 and 100".to_string(),
            ));
        }
        if self.retention_sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "RETENTION_SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn event_hub_config(&self) -> EventHubConfig {
        EventHubConfig {
            queue_capacity: self.event_queue_capacity,
            broadcast_capacity: self.event_broadcast_capacity,
        }
    }

    pub fn task_manager_config(&self) -> TaskManagerConfig {
        TaskManagerConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            progress: ProgressConfig {
                min_delta: self.progress_min_delta,
                min_interval: Duration::from_millis(self.progress_min_interval_ms),
            },
            retention: (self.task_retention_secs > 0)
                .then(|| Duration::from_secs(self.task_retention_secs)),
            sweep_interval: Duration::from_secs(self.retention_sweep_interval_secs),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{}={}", key, raw))),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_address(), "127.0.0.1:8080");

        let tasks = config.task_manager_config();
        assert_eq!(tasks.max_concurrent_tasks, 4);
        assert_eq!(tasks.progress.min_interval, Duration::from_millis(250));
        assert_eq!(tasks.retention, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("TASKRELAY_PORT", "9090"),
            ("TASKRELAY_BIND_ADDR", "0.0.0.0"),
            ("MAX_CONCURRENT_TASKS", "8"),
            ("TASK_RETENTION_SECS", "0"),
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
        ])
        .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:9090");
        assert_eq!(config.max_concurrent_tasks, 8);
        assert_eq!(config.task_manager_config().retention, None);
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("TASKRELAY_PORT", "99999")]),
            Err(ConfigError::InvalidPort)
        ));
        assert!(matches!(
            config_from(&[("MAX_CONCURRENT_TASKS", "many")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            config_from(&[("MAX_CONCURRENT_TASKS", "0")]),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            config_from(&[("PROGRESS_MIN_DELTA", "101")]),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}

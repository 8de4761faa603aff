use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{TaskError, TaskResult};

pub type TaskId = Uuid;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for a worker slot
    Pending,
    /// Routine is executing
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Forward-only transitions; nothing leaves a terminal state
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(TaskError::InvalidParams(format!("unknown status '{}'", other))),
        }
    }
}

/// Closed set of task types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Processing,
    Scrape,
    Download,
    Search,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Processing => write!(f, "processing"),
            TaskKind::Scrape => write!(f, "scrape"),
            TaskKind::Download => write!(f, "download"),
            TaskKind::Search => write!(f, "search"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(TaskKind::Processing),
            "scrape" => Ok(TaskKind::Scrape),
            "download" => Ok(TaskKind::Download),
            "search" => Ok(TaskKind::Search),
            other => Err(TaskError::InvalidParams(format!("unknown task type '{}'", other))),
        }
    }
}

/// Walk a directory and fingerprint its files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParams {
    pub input_dir: PathBuf,
    /// Only files with these extensions (case-insensitive, no dot); empty means all
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Where to write a JSON manifest of processed files
    #[serde(default)]
    pub manifest_path: Option<PathBuf>,
}

/// Fetch pages and collect titles and link counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeParams {
    pub urls: Vec<String>,
}

/// Stream remote files to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadParams {
    pub urls: Vec<String>,
    pub output_dir: PathBuf,
}

/// Query several JSON search endpoints and aggregate result counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
    /// URL templates containing a `{query}` placeholder
    pub sources: Vec<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    50
}

/// Typed payload of a task, one variant per task type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum TaskPayload {
    Processing(ProcessingParams),
    Scrape(ScrapeParams),
    Download(DownloadParams),
    Search(SearchParams),
}

impl TaskPayload {
    /// Build a payload from a task type and raw JSON params, validating both
    pub fn from_parts(kind: TaskKind, params: serde_json::Value) -> TaskResult<Self> {
        fn parse<T: serde::de::DeserializeOwned>(
            kind: TaskKind,
            params: serde_json::Value,
        ) -> TaskResult<T> {
            serde_json::from_value(params)
                .map_err(|e| TaskError::InvalidParams(format!("{} params: {}", kind, e)))
        }

        let payload = match kind {
            TaskKind::Processing => TaskPayload::Processing(parse(kind, params)?),
            TaskKind::Scrape => TaskPayload::Scrape(parse(kind, params)?),
            TaskKind::Download => TaskPayload::Download(parse(kind, params)?),
            TaskKind::Search => TaskPayload::Search(parse(kind, params)?),
        };
        payload.validate()?;
        Ok(payload)
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::Processing(_) => TaskKind::Processing,
            TaskPayload::Scrape(_) => TaskKind::Scrape,
            TaskPayload::Download(_) => TaskKind::Download,
            TaskPayload::Search(_) => TaskKind::Search,
        }
    }

    /// Reject malformed params before the task reaches the registry
    pub fn validate(&self) -> TaskResult<()> {
        match self {
            TaskPayload::Processing(p) => {
                if p.input_dir.as_os_str().is_empty() {
                    return Err(invalid("input_dir must not be empty"));
                }
            }
            TaskPayload::Scrape(p) => validate_urls(&p.urls)?,
            TaskPayload::Download(p) => {
                validate_urls(&p.urls)?;
                if p.output_dir.as_os_str().is_empty() {
                    return Err(invalid("output_dir must not be empty"));
                }
            }
            TaskPayload::Search(p) => {
                if p.query.trim().is_empty() {
                    return Err(invalid("query must not be empty"));
                }
                if p.sources.is_empty() {
                    return Err(invalid("at least one source is required"));
                }
                for source in &p.sources {
                    if !source.contains("{query}") {
                        return Err(invalid(format!(
                            "source '{}' has no {{query}} placeholder",
                            source
                        )));
                    }
                    validate_url(&source.replace("{query}", "q"))?;
                }
                if p.max_results == 0 {
                    return Err(invalid("max_results must be positive"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> TaskError {
    TaskError::InvalidParams(message.into())
}

fn validate_urls(urls: &[String]) -> TaskResult<()> {
    if urls.is_empty() {
        return Err(invalid("at least one url is required"));
    }
    urls.iter().try_for_each(|u| validate_url(u))
}

fn validate_url(url: &str) -> TaskResult<()> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| invalid(format!("invalid url '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(invalid(format!("unsupported url scheme '{}' in '{}'", scheme, url))),
    }
}

/// Immutable copy of a task handed out by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Percentage 0-100, non-decreasing
    pub progress: u8,
    pub message: String,
    /// Result payload, set once on the terminal transition
    pub stats: Option<serde_json::Value>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    pub fn new(id: TaskId, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            status: TaskStatus::Pending,
            progress: 0,
            message: "Queued".to_string(),
            stats: None,
            error: None,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// How a task ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(serde_json::Value),
    Failed(String),
    Cancelled,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Filter for listing tasks
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
}

impl TaskFilter {
    pub fn matches(&self, task: &TaskSnapshot) -> bool {
        self.status.map_or(true, |s| task.status == s) && self.kind.map_or(true, |k| task.kind == k)
    }
}

/// Registry statistics
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TaskStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub max_concurrent: usize,
    pub available_slots: usize,
    pub emergency_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));

        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_payload_from_parts() {
        let payload = TaskPayload::from_parts(
            TaskKind::Download,
            json!({"urls": ["https://example.org/a.pdf"], "output_dir": "/tmp/out"}),
        )
        .unwrap();
        assert_eq!(payload.kind(), TaskKind::Download);
    }

    #[test]
    fn test_payload_rejects_malformed_params() {
        let err = TaskPayload::from_parts(TaskKind::Scrape, json!({"pages": 3})).unwrap_err();
        assert!(matches!(err, TaskError::InvalidParams(_)));

        let err = TaskPayload::from_parts(TaskKind::Scrape, json!({"urls": []})).unwrap_err();
        assert!(matches!(err, TaskError::InvalidParams(_)));

        let err =
            TaskPayload::from_parts(TaskKind::Scrape, json!({"urls": ["ftp://host/x"]})).unwrap_err();
        assert!(err.to_string().contains("unsupported url scheme"));

        let err = TaskPayload::from_parts(
            TaskKind::Search,
            json!({"query": "crispr", "sources": ["https://api.example.org/search"]}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("{query}"));
    }

    #[test]
    fn test_payload_wire_format() {
        let payload: TaskPayload = serde_json::from_value(json!({
            "type": "search",
            "params": {"query": "graphene", "sources": ["https://api.example.org/?q={query}"]}
        }))
        .unwrap();
        match payload {
            TaskPayload::Search(p) => assert_eq!(p.max_results, 50),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_filter_matches() {
        let mut task = TaskSnapshot::new(Uuid::new_v4(), TaskKind::Scrape);
        task.status = TaskStatus::Running;

        assert!(TaskFilter::default().matches(&task));
        assert!(TaskFilter { status: Some(TaskStatus::Running), kind: None }.matches(&task));
        assert!(!TaskFilter { status: None, kind: Some(TaskKind::Search) }.matches(&task));
    }
}

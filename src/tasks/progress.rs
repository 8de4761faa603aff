use std::time::{Duration, Instant};

use super::bridge::ContextBridge;
use super::registry::TaskRegistry;
use super::types::TaskStatus;
use crate::events::TaskEvent;

/// Throttling knobs for progress events
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Minimum percentage increase that always gets emitted
    pub min_delta: u8,
    /// Minimum time between two emissions with a smaller increase
    pub min_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_delta: 1,
            min_interval: Duration::from_millis(250),
        }
    }
}

/// `floor(done / total * 100)` capped at 100; `None` when `total == 0`
pub fn compute_progress(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let percent = (done as u128 * 100) / total as u128;
    Some(percent.min(100) as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressDecision {
    Emit,
    Suppress,
}

/// Last emitted `(progress, message)` and when it left
#[derive(Debug, Default, Clone)]
pub(crate) struct ProgressTracker {
    last_emitted: Option<(u8, String)>,
    last_emitted_at: Option<Instant>,
}

impl ProgressTracker {
    pub(crate) fn last_emitted_progress(&self) -> Option<u8> {
        self.last_emitted.as_ref().map(|(p, _)| *p)
    }

    pub(crate) fn decide(
        &self,
        progress: u8,
        message: &str,
        now: Instant,
        config: &ProgressConfig,
    ) -> ProgressDecision {
        let (last_progress, last_message) = match &self.last_emitted {
            Some((p, m)) => (*p, m.as_str()),
            None => return ProgressDecision::Emit,
        };

        if last_progress == progress && last_message == message {
            return ProgressDecision::Suppress;
        }
        // Reaching 100 is always flushed
        if progress == 100 {
            return ProgressDecision::Emit;
        }

        let delta = progress.saturating_sub(last_progress);
        let elapsed = self
            .last_emitted_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);

        if delta < config.min_delta && elapsed < config.min_interval {
            ProgressDecision::Suppress
        } else {
            ProgressDecision::Emit
        }
    }

    pub(crate) fn record(&mut self, progress: u8, message: &str, now: Instant) {
        self.last_emitted = Some((progress, message.to_string()));
        self.last_emitted_at = Some(now);
    }
}

/// Routes `report_progress` calls: monotonic update in the registry, then a
/// throttled `progress_update` through the task's bridge
#[derive(Clone)]
pub struct ProgressEmitter {
    registry: TaskRegistry,
    config: ProgressConfig,
}

impl ProgressEmitter {
    pub fn new(registry: TaskRegistry, config: ProgressConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ProgressConfig {
        &self.config
    }

    /// Record progress for a running task; returns whether an event was emitted
    pub async fn report(&self, bridge: &ContextBridge, done: u64, total: u64, message: String) -> bool {
        let id = bridge.task_id();
        let _gate = bridge.lock().await;

        let now = Instant::now();
        let event = self
            .registry
            .update(id, |record| {
                // Late reports from a finalized or not-yet-started task are ignored
                if record.snapshot.status != TaskStatus::Running {
                    return None;
                }

                if let Some(candidate) = compute_progress(done, total) {
                    record.snapshot.progress = record.snapshot.progress.max(candidate);
                }
                record.snapshot.message = message;

                let progress = record.snapshot.progress;
                match record
                    .tracker
                    .decide(progress, &record.snapshot.message, now, &self.config)
                {
                    ProgressDecision::Emit => {
                        record.tracker.record(progress, &record.snapshot.message, now);
                        Some(TaskEvent::ProgressUpdate {
                            id,
                            progress,
                            message: record.snapshot.message.clone(),
                        })
                    }
                    ProgressDecision::Suppress => None,
                }
            })
            .ok()
            .flatten();

        match event {
            Some(event) => {
                bridge.deliver(event).await;
                true
            }
            None => false,
        }
    }
}

//! Built-in task routines, one per `TaskPayload` variant

mod download;
mod processing;
mod scrape;
mod search;

pub use download::DownloadRoutine;
pub use processing::ProcessingRoutine;
pub use scrape::ScrapeRoutine;
pub use search::SearchRoutine;

use std::sync::Arc;
use std::time::Duration;

use crate::tasks::{RoutineProvider, TaskPayload, TaskRoutine};

const USER_AGENT: &str = concat!("taskrelay-server/", env!("CARGO_PKG_VERSION"));

/// Default routine provider backed by a shared HTTP client
#[derive(Clone)]
pub struct BuiltinRoutines {
    http: reqwest::Client,
}

impl BuiltinRoutines {
    pub fn new(http_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http })
    }
}

impl RoutineProvider for BuiltinRoutines {
    fn routine(&self, payload: &TaskPayload) -> Arc<dyn TaskRoutine> {
        match payload {
            TaskPayload::Processing(params) => Arc::new(ProcessingRoutine::new(params.clone())),
            TaskPayload::Scrape(params) => {
                Arc::new(ScrapeRoutine::new(self.http.clone(), params.clone()))
            }
            TaskPayload::Download(params) => {
                Arc::new(DownloadRoutine::new(self.http.clone(), params.clone()))
            }
            TaskPayload::Search(params) => {
                Arc::new(SearchRoutine::new(self.http.clone(), params.clone()))
            }
        }
    }
}

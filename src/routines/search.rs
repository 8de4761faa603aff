use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::RoutineError;
use crate::tasks::{SearchParams, TaskContext, TaskRoutine};

/// Queries each JSON search endpoint and aggregates result counts
pub struct SearchRoutine {
    http: reqwest::Client,
    params: SearchParams,
}

impl SearchRoutine {
    pub fn new(http: reqwest::Client, params: SearchParams) -> Self {
        Self { http, params }
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, reqwest::Error> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        response.json::<Value>().await
    }

    async fn query_source(&self, ctx: &TaskContext, url: &str) -> Result<usize, RoutineError> {
        let body = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(RoutineError::Cancelled),
            body = self.fetch_json(url) => body?,
        };

        Ok(count_results(&body).min(self.params.max_results))
    }
}

#[async_trait]
impl TaskRoutine for SearchRoutine {
    async fn run(&self, ctx: TaskContext) -> Result<Value, RoutineError> {
        let query = self.params.query.trim();
        let encoded = urlencoding::encode(query);
        let total = self.params.sources.len() as u64;

        let mut sources = Vec::with_capacity(self.params.sources.len());
        let mut found = 0usize;
        let mut failed = 0usize;

        for (index, template) in self.params.sources.iter().enumerate() {
            ctx.check_cancelled()?;
            let url = build_url(template, &encoded);
            ctx.report_progress(index as u64, total, format!("Searching {}", host_of(&url)))
                .await;

            match self.query_source(&ctx, &url).await {
                Ok(count) => {
                    found += count;
                    sources.push(json!({ "source": template, "count": count }));
                }
                Err(RoutineError::Cancelled) => return Err(RoutineError::Cancelled),
                Err(RoutineError::Failed(error)) => {
                    warn!("Task {}: search source {} failed: {}", ctx.task_id(), template, error);
                    failed += 1;
                    sources.push(json!({ "source": template, "error": error }));
                }
            }

            ctx.report_progress(index as u64 + 1, total, format!("Searched {}", host_of(&url)))
                .await;
        }

        if failed == sources.len() {
            return Err(RoutineError::failed(format!(
                "All {} search sources failed for '{}'",
                failed, query
            )));
        }

        info!("Task {}: '{}' found {} results", ctx.task_id(), query, found);
        Ok(json!({
            "query": query,
            "sources": sources,
            "total": found,
            "failed": failed,
        }))
    }
}

fn build_url(template: &str, encoded_query: &str) -> String {
    template.replace("{query}", encoded_query)
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

/// Results are either the top-level array or the `results` / `items` array
fn count_results(body: &Value) -> usize {
    match body {
        Value::Array(items) => items.len(),
        Value::Object(map) => ["results", "items"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(Vec::len)
            .unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::testing;
    use crate::tasks::{TaskPayload, TaskStatus};
    use axum::{extract::Query, routing::get, Json, Router};
    use std::collections::HashMap;

    #[test]
    fn test_count_results() {
        assert_eq!(count_results(&json!([1, 2, 3])), 3);
        assert_eq!(count_results(&json!({"results": [1, 2]})), 2);
        assert_eq!(count_results(&json!({"items": [{}], "total": 99})), 1);
        assert_eq!(count_results(&json!({"data": []})), 0);
        assert_eq!(count_results(&json!("nope")), 0);
    }

    #[test]
    fn test_build_url_encodes_query() {
        let encoded = urlencoding::encode("carbon nanotubes & graphene");
        assert_eq!(
            build_url("https://api.example.org/search?q={query}&n=5", &encoded),
            "https://api.example.org/search?q=carbon%20nanotubes%20%26%20graphene&n=5"
        );
    }

    async fn echo(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        let q = params.get("q").cloned().unwrap_or_default();
        let hits: Vec<Value> = (0..q.len()).map(|i| json!({ "rank": i })).collect();
        Json(json!({ "results": hits }))
    }

    #[tokio::test]
    async fn test_search_aggregates_sources() {
        let app = Router::new()
            .route("/search", get(echo))
            .route("/list", get(|| async { Json(json!([1, 2, 3, 4, 5, 6, 7, 8])) }));
        let addr = testing::serve(app).await;

        let manager = testing::manager();
        let snapshot = testing::run(
            &manager,
            TaskPayload::Search(SearchParams {
                query: "a b".into(),
                sources: vec![
                    format!("http://{}/search?q={{query}}", addr),
                    format!("http://{}/list?q={{query}}", addr),
                    format!("http://{}/absent?q={{query}}", addr),
                ],
                max_results: 5,
            }),
        )
        .await;

        assert_eq!(snapshot.status, TaskStatus::Completed, "{:?}", snapshot.error);
        let stats = snapshot.stats.unwrap();
        assert_eq!(stats["query"], "a b");
        // "a b" decodes to three characters; the list is capped at max_results
        assert_eq!(stats["sources"][0]["count"], 3);
        assert_eq!(stats["sources"][1]["count"], 5);
        assert!(stats["sources"][2]["error"].is_string());
        assert_eq!(stats["total"], 8);
        assert_eq!(stats["failed"], 1);
    }
}

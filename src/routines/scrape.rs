use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::error::RoutineError;
use crate::tasks::{ScrapeParams, TaskContext, TaskRoutine};

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']?[^"'\s>]"#).expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Fetches pages and records their titles and link counts
pub struct ScrapeRoutine {
    http: reqwest::Client,
    params: ScrapeParams,
}

impl ScrapeRoutine {
    pub fn new(http: reqwest::Client, params: ScrapeParams) -> Self {
        Self { http, params }
    }

    async fn fetch(&self, ctx: &TaskContext, url: &str) -> Result<String, RoutineError> {
        let request = async {
            let response = self.http.get(url).send().await?.error_for_status()?;
            Ok::<_, reqwest::Error>(response.text().await?)
        };

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(RoutineError::Cancelled),
            body = request => body.map_err(RoutineError::from),
        }
    }
}

#[async_trait]
impl TaskRoutine for ScrapeRoutine {
    async fn run(&self, ctx: TaskContext) -> Result<Value, RoutineError> {
        let total = self.params.urls.len() as u64;
        let mut titles = Vec::new();
        let mut errors = Vec::new();
        let mut links = 0usize;

        for (index, url) in self.params.urls.iter().enumerate() {
            ctx.check_cancelled()?;
            ctx.report_progress(index as u64, total, format!("Fetching {}", url))
                .await;

            match self.fetch(&ctx, url).await {
                Ok(body) => {
                    let page = parse_page(&body);
                    debug!("Scraped {}: {:?}, {} links", url, page.title, page.links);
                    links += page.links;
                    titles.push(json!({ "url": url, "title": page.title, "links": page.links }));
                }
                Err(RoutineError::Cancelled) => return Err(RoutineError::Cancelled),
                Err(RoutineError::Failed(error)) => {
                    warn!("Task {}: failed to scrape {}: {}", ctx.task_id(), url, error);
                    errors.push(json!({ "url": url, "error": error }));
                }
            }

            ctx.report_progress(index as u64 + 1, total, format!("Scraped {}", url))
                .await;
        }

        if titles.is_empty() {
            let first = errors
                .first()
                .and_then(|e| e["error"].as_str())
                .unwrap_or("no urls");
            return Err(RoutineError::failed(format!(
                "All {} pages failed: {}",
                total, first
            )));
        }

        Ok(json!({
            "pages": titles.len(),
            "titles": titles,
            "links": links,
            "failed": errors.len(),
            "errors": errors,
        }))
    }
}

#[derive(Debug, PartialEq)]
struct PageSummary {
    title: Option<String>,
    links: usize,
}

fn parse_page(html: &str) -> PageSummary {
    let title = TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| WHITESPACE_RE.replace_all(m.as_str(), " ").trim().to_string())
        .filter(|t| !t.is_empty());

    PageSummary {
        title,
        links: LINK_RE.find_iter(html).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::testing;
    use crate::tasks::{TaskPayload, TaskStatus};
    use axum::{http::StatusCode, response::Html, routing::get, Router};

    const PAGE: &str = r#"<html><head><TITLE>
        Graphene   Review
    </TITLE></head><body>
    <a href="/one">1</a> <a class="x" href='/two'>2</a>
    <a name="anchor">no href</a> <A HREF=/three>3</A>
    </body></html>"#;

    #[test]
    fn test_parse_page() {
        assert_eq!(
            parse_page(PAGE),
            PageSummary { title: Some("Graphene Review".into()), links: 3 }
        );
        assert_eq!(
            parse_page("<p>no title</p>"),
            PageSummary { title: None, links: 0 }
        );
    }

    #[tokio::test]
    async fn test_scrape_collects_titles_and_failures() {
        let app = Router::new()
            .route("/page", get(|| async { Html(PAGE) }))
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let addr = testing::serve(app).await;

        let manager = testing::manager();
        let snapshot = testing::run(
            &manager,
            TaskPayload::Scrape(ScrapeParams {
                urls: vec![
                    format!("http://{}/page", addr),
                    format!("http://{}/broken", addr),
                ],
            }),
        )
        .await;

        assert_eq!(snapshot.status, TaskStatus::Completed, "{:?}", snapshot.error);
        let stats = snapshot.stats.unwrap();
        assert_eq!(stats["pages"], 1);
        assert_eq!(stats["links"], 3);
        assert_eq!(stats["failed"], 1);
        assert_eq!(stats["titles"][0]["title"], "Graphene Review");
    }
}

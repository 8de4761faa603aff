use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::RoutineError;
use crate::tasks::{DownloadParams, TaskContext, TaskRoutine};

/// Streams each URL into the output directory
pub struct DownloadRoutine {
    http: reqwest::Client,
    params: DownloadParams,
}

impl DownloadRoutine {
    pub fn new(http: reqwest::Client, params: DownloadParams) -> Self {
        Self { http, params }
    }

    async fn download_one(
        &self,
        ctx: &TaskContext,
        url: &str,
        target: &Path,
    ) -> Result<u64, RoutineError> {
        let request = async {
            let response = self.http.get(url).send().await?;
            response.error_for_status()
        };

        let response = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(RoutineError::Cancelled),
            response = request => response?,
        };

        let file = tokio::fs::File::create(target).await.map_err(|e| {
            RoutineError::failed(format!("Failed to create {}: {}", target.display(), e))
        })?;

        let result = write_body(ctx, url, response, file).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(target).await {
                debug!("Could not remove partial file {}: {}", target.display(), e);
            }
        }
        result
    }
}

/// Stream the body into `file`; the caller removes the file on any error
async fn write_body(
    ctx: &TaskContext,
    url: &str,
    response: reqwest::Response,
    mut file: tokio::fs::File,
) -> Result<u64, RoutineError> {
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(RoutineError::Cancelled),
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                file.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
            Some(Err(e)) => {
                return Err(RoutineError::failed(format!("Failed to read {}: {}", url, e)));
            }
            None => break,
        }
    }

    file.flush().await?;
    Ok(written)
}

#[async_trait]
impl TaskRoutine for DownloadRoutine {
    async fn run(&self, ctx: TaskContext) -> Result<Value, RoutineError> {
        let output_dir = &self.params.output_dir;
        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            RoutineError::failed(format!(
                "Failed to create output directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;

        let total = self.params.urls.len() as u64;
        let mut used_names = HashSet::new();
        let mut files = Vec::new();
        let mut errors = Vec::new();
        let mut bytes = 0u64;

        for (index, url) in self.params.urls.iter().enumerate() {
            ctx.check_cancelled()?;
            ctx.report_progress(index as u64, total, format!("Downloading {}", url))
                .await;

            let target = output_dir.join(unique_name(file_name_for(url, index), &mut used_names));
            match self.download_one(&ctx, url, &target).await {
                Ok(size) => {
                    info!("Task {}: downloaded {} ({} bytes)", ctx.task_id(), url, size);
                    bytes += size;
                    files.push(target.to_string_lossy().to_string());
                }
                Err(RoutineError::Cancelled) => return Err(RoutineError::Cancelled),
                Err(RoutineError::Failed(error)) => {
                    warn!("Task {}: download of {} failed: {}", ctx.task_id(), url, error);
                    errors.push(json!({ "url": url, "error": error }));
                }
            }

            ctx.report_progress(index as u64 + 1, total, format!("Finished {}", url))
                .await;
        }

        if files.is_empty() {
            let first = errors
                .first()
                .and_then(|e| e["error"].as_str())
                .unwrap_or("no urls");
            return Err(RoutineError::failed(format!(
                "All {} downloads failed: {}",
                total, first
            )));
        }

        Ok(json!({
            "downloaded": files.len(),
            "failed": errors.len(),
            "bytes": bytes,
            "files": files,
            "errors": errors,
        }))
    }
}

/// Last path segment of the URL, reduced to a safe file name
fn file_name_for(url: &str, index: usize) -> String {
    let segment = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        })
        .filter(|s| !s.is_empty());

    match segment {
        Some(name) => {
            let cleaned: String = name
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            let trimmed = cleaned.trim_start_matches('.');
            if trimmed.is_empty() {
                format!("download-{}", index + 1)
            } else {
                trimmed.to_string()
            }
        }
        None => format!("download-{}", index + 1),
    }
}

fn unique_name(name: String, used: &mut HashSet<String>) -> PathBuf {
    let mut candidate = name.clone();
    let mut n = 1;
    while !used.insert(candidate.clone()) {
        candidate = format!("{}-{}", n, name);
        n += 1;
    }
    PathBuf::from(candidate)
}

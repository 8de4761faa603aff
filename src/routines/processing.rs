use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::RoutineError;
use crate::tasks::{BlockingTaskContext, ProcessingParams, TaskContext, TaskRoutine};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Walks a directory and fingerprints every matching file
pub struct ProcessingRoutine {
    params: ProcessingParams,
}

impl ProcessingRoutine {
    pub fn new(params: ProcessingParams) -> Self {
        Self { params }
    }
}

#[derive(Debug, Serialize)]
struct ProcessedFile {
    path: String,
    size: u64,
    sha256: String,
}

#[async_trait]
impl TaskRoutine for ProcessingRoutine {
    async fn run(&self, ctx: TaskContext) -> Result<Value, RoutineError> {
        let params = self.params.clone();
        let blocking = ctx.blocking();

        // Hashing is CPU and disk bound, keep it off the async workers
        tokio::task::spawn_blocking(move || process_directory(&params, &blocking))
            .await
            .map_err(|e| RoutineError::failed(format!("Processing worker failed: {}", e)))?
    }
}

fn process_directory(
    params: &ProcessingParams,
    ctx: &BlockingTaskContext,
) -> Result<Value, RoutineError> {
    let root = &params.input_dir;
    if !root.is_dir() {
        return Err(RoutineError::failed(format!(
            "Input directory not found: {}",
            root.display()
        )));
    }

    ctx.report_progress(0, 0, "Scanning input directory");
    let files = collect_files(root, &params.extensions, ctx)?;
    let total = files.len() as u64;
    info!("Task {}: {} files to process in {}", ctx.task_id(), total, root.display());

    let mut processed = Vec::with_capacity(files.len());
    let mut bytes = 0u64;

    for (index, path) in files.iter().enumerate() {
        ctx.check_cancelled()?;

        let (sha256, size) = hash_file(path)?;
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path.as_path())
            .to_string_lossy()
            .to_string();
        debug!("Hashed {} ({} bytes)", relative, size);

        bytes += size;
        ctx.report_progress(index as u64 + 1, total, format!("Processed {}", relative));
        processed.push(ProcessedFile { path: relative, size, sha256 });
    }

    let manifest = match &params.manifest_path {
        Some(path) => {
            write_manifest(path, &processed)?;
            Some(path.to_string_lossy().to_string())
        }
        None => None,
    };

    Ok(json!({
        "files": processed.len(),
        "bytes": bytes,
        "manifest": manifest,
    }))
}

fn collect_files(
    root: &Path,
    extensions: &[String],
    ctx: &BlockingTaskContext,
) -> Result<Vec<PathBuf>, RoutineError> {
    let wanted: Vec<String> = extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .collect();

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        ctx.check_cancelled()?;
        let entry =
            entry.map_err(|e| RoutineError::failed(format!("Failed to walk directory: {}", e)))?;
        if entry.file_type().is_file() && has_extension(entry.path(), &wanted) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn has_extension(path: &Path, wanted: &[String]) -> bool {
    if wanted.is_empty() {
        return true;
    }
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| wanted.contains(&ext))
        .unwrap_or(false)
}

fn hash_file(path: &Path) -> Result<(String, u64), RoutineError> {
    let mut file = File::open(path)
        .map_err(|e| RoutineError::failed(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok((hex::encode(hasher.finalize()), size))
}

fn write_manifest(path: &Path, files: &[ProcessedFile]) -> Result<(), RoutineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(files)?;
    std::fs::write(path, body)
        .map_err(|e| RoutineError::failed(format!("Failed to write manifest {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::testing;
    use crate::tasks::{TaskPayload, TaskStatus};

    #[test]
    fn test_has_extension() {
        let wanted = vec!["txt".to_string(), "csv".to_string()];
        assert!(has_extension(Path::new("a/b.TXT"), &wanted));
        assert!(has_extension(Path::new("data.csv"), &wanted));
        assert!(!has_extension(Path::new("image.png"), &wanted));
        assert!(!has_extension(Path::new("README"), &wanted));
        assert!(has_extension(Path::new("anything.bin"), &[]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_processing_hashes_matching_files() {
        let input = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(input.path().join("nested")).unwrap();
        std::fs::write(input.path().join("nested/b.TXT"), b"world!").unwrap();
        std::fs::write(input.path().join("skip.csv"), b"1,2,3").unwrap();

        let out = tempfile::tempdir().unwrap();
        let manifest_path = out.path().join("reports/manifest.json");

        let manager = testing::manager();
        let snapshot = testing::run(
            &manager,
            TaskPayload::Processing(ProcessingParams {
                input_dir: input.path().to_path_buf(),
                extensions: vec![".txt".to_string()],
                manifest_path: Some(manifest_path.clone()),
            }),
        )
        .await;

        assert_eq!(snapshot.status, TaskStatus::Completed, "{:?}", snapshot.error);
        assert_eq!(snapshot.progress, 100);
        let stats = snapshot.stats.unwrap();
        assert_eq!(stats["files"], 2);
        assert_eq!(stats["bytes"], 11);

        let manifest: Vec<Value> =
            serde_json::from_slice(&std::fs::read(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[0]["path"], "a.txt");
        assert_eq!(
            manifest[0]["sha256"],
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_processing_missing_directory_fails() {
        let missing = tempfile::tempdir().unwrap().path().join("gone");

        let manager = testing::manager();
        let snapshot = testing::run(
            &manager,
            TaskPayload::Processing(ProcessingParams {
                input_dir: missing.clone(),
                extensions: Vec::new(),
                manifest_path: None,
            }),
        )
        .await;

        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(
            snapshot.message,
            format!("Input directory not found: {}", missing.display())
        );
    }
}

//! One-shot import of the legacy file-based job queue.
//!
//! A legacy batch is a pair of files in the queue directory:
//! `<name>.job.json` (an object with `type` and the job payload) and
//! `<name>.targets.json` (an array of targets). Each pair becomes one durable
//! job keyed by `legacy:<name>:<sha256>`; the files are removed only after
//! the job is committed, so a crash in between re-imports nothing.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::models::JobKind;
use crate::modules::store::Store;

const JOB_SUFFIX: &str = ".job.json";
const TARGETS_SUFFIX: &str = ".targets.json";

/// Parsed legacy batch
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyBatch {
    pub name: String,
    pub kind: JobKind,
    pub payload: Value,
    pub requester: i64,
    pub targets: Vec<String>,
    pub external_ref: String,
}

/// Summary of a migration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub already_present: usize,
    pub skipped: usize,
}

/// Import every legacy batch found in `dir`
pub fn import_legacy_queue(store: &dyn Store, dir: &Path) -> AppResult<ImportReport> {
    let mut report = ImportReport::default();
    if !dir.exists() {
        return Ok(report);
    }

    let mut job_files: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(JOB_SUFFIX))
        })
        .collect();
    job_files.sort();

    for job_path in job_files {
        let batch = match read_batch(&job_path) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(file = %job_path.display(), error = %e, "Skipping legacy batch");
                report.skipped += 1;
                continue;
            }
        };

        let enqueued = store.enqueue_job(
            batch.kind,
            &batch.payload,
            batch.requester,
            &batch.targets,
            Some(&batch.external_ref),
        )?;
        if enqueued.created {
            report.imported += 1;
            tracing::info!(
                name = %batch.name,
                job_id = enqueued.job_id,
                targets = enqueued.targets,
                "Imported legacy job"
            );
        } else {
            report.already_present += 1;
            tracing::info!(name = %batch.name, job_id = enqueued.job_id, "Legacy job already imported");
        }

        // Committed: the files are no longer the source of truth
        for path in [job_path.clone(), targets_path(&job_path, &batch.name)] {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(file = %path.display(), error = %e, "Failed to remove legacy file");
            }
        }
    }

    Ok(report)
}

fn targets_path(job_path: &Path, name: &str) -> PathBuf {
    job_path.with_file_name(format!("{}{}", name, TARGETS_SUFFIX))
}

/// Read and validate one pair of legacy files
pub fn read_batch(job_path: &Path) -> AppResult<LegacyBatch> {
    let file_name = job_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::Config(format!("bad legacy file name {}", job_path.display())))?;
    let name = file_name.trim_end_matches(JOB_SUFFIX).to_string();
    let targets_path = targets_path(job_path, &name);

    let job_bytes = fs::read(job_path)?;
    let targets_bytes = fs::read(&targets_path)?;

    let job: Value = serde_json::from_slice(&job_bytes)?;
    let mut job = match job {
        Value::Object(map) => map,
        _ => return Err(AppError::Config(format!("{} is not an object", file_name))),
    };

    let kind = job
        .get("type")
        .or_else(|| job.get("kind"))
        .and_then(|v| v.as_str())
        .and_then(JobKind::parse)
        .ok_or_else(|| AppError::Config(format!("{} has no valid type", file_name)))?;
    let requester = job
        .get("requester")
        .or_else(|| job.get("admin_id"))
        .and_then(value_as_i64)
        .unwrap_or(0);
    for key in ["type", "kind", "requester", "admin_id"] {
        job.remove(key);
    }
    let payload = match job.remove("payload") {
        Some(payload) => payload,
        None => Value::Object(job),
    };

    let targets: Value = serde_json::from_slice(&targets_bytes)?;
    let targets = parse_targets(kind, &targets)
        .ok_or_else(|| AppError::Config(format!("{}{} is not a target list", name, TARGETS_SUFFIX)))?;

    let mut hasher = Sha256::new();
    hasher.update(&job_bytes);
    hasher.update(&targets_bytes);
    let digest = format!("{:x}", hasher.finalize());

    Ok(LegacyBatch {
        external_ref: format!("legacy:{}:{}", name, digest),
        name,
        kind,
        payload,
        requester,
        targets,
    })
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `{"id": ..}` for notify, `{"username": ..}` for gift; bare scalars accepted
fn parse_targets(kind: JobKind, value: &Value) -> Option<Vec<String>> {
    let key = match kind {
        JobKind::Notify => "id",
        JobKind::Gift => "username",
    };
    let list = value.as_array()?;
    Some(
        list.iter()
            .filter_map(|item| match item {
                Value::Object(map) => field(map, key),
                other => scalar(other),
            })
            .collect(),
    )
}

fn field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(scalar)
}

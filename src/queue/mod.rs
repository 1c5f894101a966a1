//! Durable batch jobs (bulk notifications and gifts).

pub mod processor;

pub use processor::{QueueProcessor, TickSummary};

use crate::error::AppResult;
use crate::models::JobKind;
use crate::modules::store::Store;

/// Persist a job with one pending item per target.
/// Returns the job id and the number of targets recorded.
pub fn enqueue_job(
    store: &dyn Store,
    kind: JobKind,
    payload: &serde_json::Value,
    requester: i64,
    targets: &[String],
) -> AppResult<(i64, usize)> {
    let enqueued = store.enqueue_job(kind, payload, requester, targets, None)?;
    Ok((enqueued.job_id, enqueued.targets))
}

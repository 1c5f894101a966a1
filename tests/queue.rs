//! Batch job queue: delivery, progress and legacy import.

mod common;

use chrono::Utc;
use serde_json::json;
use std::fs;

use common::{account, harness, record, MemoryPanel};
use panelsync_lib::models::{AppConfig, JobKind, JobState, ServiceStatus};
use panelsync_lib::modules::migration::import_legacy_queue;
use panelsync_lib::modules::store::Store;
use panelsync_lib::panel::status::{DAY_SECS, GIB};
use panelsync_lib::queue::{enqueue_job, QueueProcessor};

const ADMIN: i64 = 900;

fn targets(ids: &[i64]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

// =============================================================================
// Notify jobs
// =============================================================================

#[tokio::test]
async fn test_notify_job_failing_everywhere_still_completes() {
    let h = harness(&[], AppConfig::default());
    h.notifier.failing.lock().unwrap().extend([11, 12]);
    let payload = json!({"text": "maintenance tonight", "progress_message_id": 55});
    let (job_id, count) =
        enqueue_job(&*h.store, JobKind::Notify, &payload, ADMIN, &targets(&[11, 12])).unwrap();
    assert_eq!(count, 2);

    let tick = QueueProcessor::new().run_once(&h.state).await.unwrap();
    assert_eq!(tick.done, 0);
    assert_eq!(tick.failed, 2);
    assert_eq!(tick.completed_jobs, 1);

    let job = h.store.job(job_id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Done);
    let progress = h.store.job_progress(job_id).unwrap();
    assert_eq!((progress.pending, progress.done, progress.failed), (0, 0, 2));

    let summary = h.notifier.messages_to(ADMIN);
    assert_eq!(summary.len(), 1);
    assert!(summary[0].contains("0 delivered, 2 failed"));
    assert_eq!(*h.notifier.deleted.lock().unwrap(), vec![(ADMIN, 55)]);
}

#[tokio::test]
async fn test_notify_job_respects_batch_size() {
    let mut config = AppConfig::default();
    config.queue.notify_batch_size = 2;
    let h = harness(&[], config);
    let (job_id, _) = enqueue_job(
        &*h.store,
        JobKind::Notify,
        &json!({"text": "hello"}),
        ADMIN,
        &targets(&[1, 2, 3, 4, 5]),
    )
    .unwrap();
    let processor = QueueProcessor::new();

    let first = processor.run_once(&h.state).await.unwrap();
    assert_eq!(first.done, 2);
    assert_eq!(first.completed_jobs, 0);
    assert_eq!(h.store.job_progress(job_id).unwrap().pending, 3);

    processor.run_once(&h.state).await.unwrap();
    let last = processor.run_once(&h.state).await.unwrap();
    assert_eq!(last.done, 1);
    assert_eq!(last.completed_jobs, 1);

    assert_eq!(h.notifier.messages_to(3), vec!["hello".to_string()]);
    assert_eq!(h.notifier.messages_to(ADMIN).len(), 1);
    assert!(h.store.active_job(JobKind::Notify).unwrap().is_none());
}

#[tokio::test]
async fn test_bad_targets_and_empty_text_fail_items() {
    let h = harness(&[], AppConfig::default());
    enqueue_job(
        &*h.store,
        JobKind::Notify,
        &json!({"text": "  "}),
        0,
        &["abc".to_string(), "7".to_string()],
    )
    .unwrap();

    let tick = QueueProcessor::new().run_once(&h.state).await.unwrap();
    assert_eq!(tick.failed, 2);
    assert_eq!(tick.completed_jobs, 1);
    // No requester, so nobody hears about it
    assert_eq!(h.notifier.count(), 0);
}

#[tokio::test]
async fn test_job_without_targets_completes_on_next_tick() {
    let h = harness(&[], AppConfig::default());
    let (job_id, _) =
        enqueue_job(&*h.store, JobKind::Notify, &json!({"text": "x"}), 0, &[]).unwrap();

    let tick = QueueProcessor::new().run_once(&h.state).await.unwrap();
    assert_eq!(tick.completed_jobs, 1);
    assert_eq!(h.store.job(job_id).unwrap().unwrap().state, JobState::Done);
}

// =============================================================================
// Gift jobs
// =============================================================================

#[tokio::test]
async fn test_gift_tops_up_and_reactivates() {
    let now = Utc::now().timestamp();
    let panel = MemoryPanel::new("p1");
    panel.insert(account("nina", 10 * GIB, 10 * GIB, now + 5 * DAY_SECS));
    let h = harness(&[panel.clone()], AppConfig::default());
    let id = record(&h.store, 7, "p1", "nina", ServiceStatus::Limited);
    h.store.mark_volume_sent(id).unwrap();

    let (job_id, _) = enqueue_job(
        &*h.store,
        JobKind::Gift,
        &json!({"volume_gb": 2, "days": 3}),
        ADMIN,
        &["nina".to_string(), "nobody".to_string()],
    )
    .unwrap();

    let tick = QueueProcessor::new().run_once(&h.state).await.unwrap();
    assert_eq!(tick.done, 1);
    assert_eq!(tick.failed, 1);
    assert_eq!(tick.completed_jobs, 1);

    let gifted = panel.accounts.lock().unwrap().get("nina").cloned().unwrap();
    assert_eq!(gifted.data_limit, 12 * GIB);
    assert_eq!(gifted.expire_time, now + 8 * DAY_SECS);

    let stored = h.store.service(id).unwrap().unwrap();
    assert_eq!(stored.status, ServiceStatus::Active);
    assert!(!stored.volume_sent);

    let notices = h.notifier.messages_to(7);
    assert_eq!(notices.len(), 1);
    assert!(notices[0].contains("2GB"));

    let progress = h.store.job_progress(job_id).unwrap();
    assert_eq!((progress.done, progress.failed), (1, 1));
}

#[tokio::test]
async fn test_gift_leaves_unlimited_fields_alone() {
    let panel = MemoryPanel::new("p1");
    panel.insert(account("omar", 0, 5 * GIB, 0));
    let h = harness(&[panel.clone()], AppConfig::default());
    record(&h.store, 7, "p1", "omar", ServiceStatus::Active);

    enqueue_job(
        &*h.store,
        JobKind::Gift,
        &json!({"volume_gb": 5, "days": 10, "panel_id": "p1"}),
        0,
        &["omar".to_string()],
    )
    .unwrap();
    let tick = QueueProcessor::new().run_once(&h.state).await.unwrap();
    assert_eq!(tick.done, 1);

    let untouched = panel.accounts.lock().unwrap().get("omar").cloned().unwrap();
    assert_eq!(untouched.data_limit, 0);
    assert_eq!(untouched.expire_time, 0);
    assert_eq!(panel.calls("modify"), 0);
}

#[tokio::test]
async fn test_unreadable_or_empty_gift_fails_items() {
    let panel = MemoryPanel::new("p1");
    panel.insert(account("pia", 10 * GIB, 10 * GIB, 0));
    let h = harness(&[panel.clone()], AppConfig::default());
    let id = record(&h.store, 7, "p1", "pia", ServiceStatus::Limited);

    let (garbled, _) = enqueue_job(
        &*h.store,
        JobKind::Gift,
        &json!({"volume_gb": "lots", "days": 3}),
        0,
        &["pia".to_string()],
    )
    .unwrap();
    let tick = QueueProcessor::new().run_once(&h.state).await.unwrap();
    assert_eq!((tick.done, tick.failed, tick.completed_jobs), (0, 1, 1));
    assert_eq!(h.store.job_progress(garbled).unwrap().failed, 1);

    enqueue_job(&*h.store, JobKind::Gift, &json!({}), 0, &["pia".to_string()]).unwrap();
    let tick = QueueProcessor::new().run_once(&h.state).await.unwrap();
    assert_eq!((tick.done, tick.failed), (0, 1));

    assert_eq!(panel.calls("modify"), 0);
    assert_eq!(h.store.service(id).unwrap().unwrap().status, ServiceStatus::Limited);
    assert_eq!(h.notifier.count(), 0);
}

// =============================================================================
// Legacy import
// =============================================================================

#[tokio::test]
async fn test_imported_legacy_batch_is_processed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("broadcast.job.json"),
        json!({"type": "notify", "admin_id": "900", "text": "new servers"}).to_string(),
    )
    .unwrap();
    fs::write(
        dir.path().join("broadcast.targets.json"),
        json!([{"id": 21}, {"id": 22}]).to_string(),
    )
    .unwrap();

    let h = harness(&[], AppConfig::default());
    let report = import_legacy_queue(&*h.store, dir.path()).unwrap();
    assert_eq!(report.imported, 1);

    let tick = QueueProcessor::new().run_once(&h.state).await.unwrap();
    assert_eq!(tick.done, 2);
    assert_eq!(tick.completed_jobs, 1);
    assert_eq!(h.notifier.messages_to(21), vec!["new servers".to_string()]);
    assert_eq!(h.notifier.messages_to(ADMIN).len(), 1);

    // Re-running the import on the emptied directory adds nothing
    let rerun = import_legacy_queue(&*h.store, dir.path()).unwrap();
    assert_eq!(rerun.imported, 0);
    assert!(h.store.active_job(JobKind::Notify).unwrap().is_none());
}

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::{ItemState, Job, JobItem, JobKind, ServiceStatus};
use crate::modules::notifier::notify_user;
use crate::panel::lifecycle::apply_gift;
use crate::panel::status::{gb_to_bytes, now_secs};
use crate::utils::format::format_gb;
use crate::AppState;

const MAX_REASON_CHARS: usize = 200;

#[derive(Debug, Default, Deserialize)]
struct NotifyPayload {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct GiftPayload {
    #[serde(default)]
    volume_gb: f64,
    #[serde(default)]
    days: u32,
    /// Restricts the lookup to one panel; any panel otherwise
    #[serde(default)]
    panel_id: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub done: usize,
    pub failed: usize,
    pub completed_jobs: usize,
}

/// Drains at most one active job per kind each tick
#[derive(Default)]
pub struct QueueProcessor;

fn parse<T: for<'de> Deserialize<'de>>(job: &Job) -> AppResult<T> {
    serde_json::from_value(job.payload.clone()).map_err(|e| {
        tracing::warn!(job_id = job.id, error = %e, "Unreadable job payload");
        AppError::Config(format!("unreadable {} payload: {}", job.kind.as_str(), e))
    })
}

fn progress_message_id(payload: &Value) -> Option<i64> {
    payload.get("progress_message_id").and_then(Value::as_i64)
}

impl QueueProcessor {
    pub fn new() -> Self {
        Self
    }

    async fn notify_item(&self, state: &AppState, payload: &NotifyPayload, item: &JobItem) -> AppResult<()> {
        let chat_id: i64 = item
            .target
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("invalid chat id {:?}", item.target)))?;
        if payload.text.trim().is_empty() {
            return Err(AppError::Config("empty message text".into()));
        }
        state.notifier.send(chat_id, &payload.text).await
    }

    async fn gift_item(&self, state: &AppState, payload: &GiftPayload, item: &JobItem) -> AppResult<()> {
        if payload.volume_gb <= 0.0 && payload.days == 0 {
            return Err(AppError::Config("gift carries neither volume nor days".into()));
        }
        let username = item.target.trim();
        let record = match &payload.panel_id {
            Some(panel_id) => state.store.service_by_username(panel_id, username)?,
            None => state.store.find_service(username)?,
        }
        .ok_or_else(|| AppError::Store(format!("no service named {}", username)))?;

        let (_, client) = state.client(&record.panel_id).await?;
        let account = apply_gift(client.as_ref(), username, gb_to_bytes(payload.volume_gb), payload.days)
            .await
            .map_err(|e| state.panel_failure(&record.panel_id, e))?;

        let now = now_secs();
        state
            .store
            .update_status(record.id, ServiceStatus::from(account.status), now)?;
        state.store.reset_warning_flags(record.id)?;

        let args = [
            ("volume", format_gb(payload.volume_gb)),
            ("days", payload.days.to_string()),
            ("username", username.to_string()),
        ];
        if let Err(e) = notify_user(
            state.store.as_ref(),
            state.notifier.as_ref(),
            &state.config.language,
            record.user_id,
            "gift_received",
            &args,
        )
        .await
        {
            tracing::warn!(user_id = record.user_id, error = %e, "Gift notice not delivered");
        }
        Ok(())
    }

    async fn run_item(&self, state: &AppState, job: &Job, item: &JobItem) -> AppResult<()> {
        match job.kind {
            JobKind::Notify => self.notify_item(state, &parse(job)?, item).await,
            JobKind::Gift => self.gift_item(state, &parse::<GiftPayload>(job)?, item).await,
        }
    }

    /// Summary to the requester and removal of the progress message
    async fn finish(&self, state: &AppState, job: &Job) -> AppResult<()> {
        state.store.complete_job(job.id)?;
        let progress = state.store.job_progress(job.id)?;
        tracing::info!(
            job_id = job.id,
            kind = job.kind.as_str(),
            done = progress.done,
            failed = progress.failed,
            "Job completed"
        );

        if job.requester == 0 {
            return Ok(());
        }
        let args = [
            ("id", job.id.to_string()),
            ("kind", job.kind.as_str().to_string()),
            ("done", progress.done.to_string()),
            ("failed", progress.failed.to_string()),
        ];
        if let Err(e) = notify_user(
            state.store.as_ref(),
            state.notifier.as_ref(),
            &state.config.language,
            job.requester,
            "job_summary",
            &args,
        )
        .await
        {
            tracing::warn!(job_id = job.id, error = %e, "Job summary not delivered");
        }

        if let Some(message_id) = progress_message_id(&job.payload) {
            if let Err(e) = state.notifier.delete_message(job.requester, message_id).await {
                tracing::debug!(job_id = job.id, message_id, error = %e, "Progress message not deleted");
            }
        }
        Ok(())
    }

    async fn drain(&self, state: &AppState, kind: JobKind, summary: &mut TickSummary) -> AppResult<()> {
        let Some(job) = state.store.active_job(kind)? else {
            return Ok(());
        };
        let batch_size = match kind {
            JobKind::Notify => state.config.queue.notify_batch_size,
            JobKind::Gift => state.config.queue.gift_batch_size,
        };

        let items = state.store.pending_items(job.id, batch_size.max(1))?;
        if items.is_empty() {
            self.finish(state, &job).await?;
            summary.completed_jobs += 1;
            return Ok(());
        }

        for item in &items {
            match self.run_item(state, &job, item).await {
                Ok(()) => {
                    state.store.mark_item(item.id, ItemState::Done, None)?;
                    summary.done += 1;
                }
                Err(e) => {
                    let reason: String = e.to_string().chars().take(MAX_REASON_CHARS).collect();
                    tracing::warn!(job_id = job.id, target = %item.target, error = %reason, "Job item failed");
                    state.store.mark_item(item.id, ItemState::Failed, Some(&reason))?;
                    summary.failed += 1;
                }
            }
        }

        if state.store.job_progress(job.id)?.pending == 0 {
            self.finish(state, &job).await?;
            summary.completed_jobs += 1;
        }
        Ok(())
    }

    pub async fn run_once(&self, state: &AppState) -> AppResult<TickSummary> {
        let mut summary = TickSummary::default();
        for kind in JobKind::ALL {
            // One kind failing at the store level must not starve the other
            if let Err(e) = self.drain(state, kind, &mut summary).await {
                tracing::error!(kind = kind.as_str(), error = %e, "Queue drain failed");
            }
        }
        Ok(summary)
    }
}

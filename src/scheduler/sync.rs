//! Applies pending enable/disable transitions to the vendor.

use crate::error::{AppError, AppResult};
use crate::models::{PendingTransition, ServiceRecord, ServiceStatus};
use crate::modules::i18n;
use crate::modules::notifier::alert_admins;
use crate::panel::status::now_secs;
use crate::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub applied: usize,
    /// Account gone on the vendor, pending flag dropped
    pub cleared: usize,
    pub failed: usize,
    pub gave_up: usize,
}

enum Outcome {
    Applied,
    Missing,
}

async fn apply(state: &AppState, record: &ServiceRecord, transition: PendingTransition) -> AppResult<Outcome> {
    let (_, client) = state.client(&record.panel_id).await?;
    let fail = |e| state.panel_failure(&record.panel_id, e);

    match client.get_account(&record.username).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => return Ok(Outcome::Missing),
        Err(e) => return Err(fail(e)),
    }

    // Derived status hides the enable flag of on-hold accounts, so the call
    // is made regardless. Adapters treat a repeat as a no-op.
    match transition {
        PendingTransition::Disable => client.disable_account(&record.username).await.map_err(fail)?,
        PendingTransition::Enable => client.enable_account(&record.username).await.map_err(fail)?,
    }

    let status = client
        .get_account(&record.username)
        .await
        .map_err(fail)?
        .status;
    state
        .store
        .complete_sync(record.id, ServiceStatus::from(status), now_secs())?;
    Ok(Outcome::Applied)
}

async fn give_up(state: &AppState, record: &ServiceRecord, transition: PendingTransition, attempts: u32, error: &AppError) {
    let text = i18n::render(
        &state.config.language,
        "sync_gave_up",
        &[
            ("action", transition.as_str().to_string()),
            ("username", record.username.clone()),
            ("panel", record.panel_id.clone()),
            ("attempts", attempts.to_string()),
            ("error", error.to_string()),
        ],
    );
    alert_admins(state.store.as_ref(), state.notifier.as_ref(), &text).await;
}

/// One pass over a random sample of records with a pending transition
pub async fn run_once(state: &AppState) -> AppResult<SyncSummary> {
    let cfg = &state.config.scheduler;
    let sample = state.store.pending_sync_sample(cfg.sync_sample_size)?;
    let mut summary = SyncSummary::default();

    for record in sample {
        let Some(transition) = record.pending else {
            continue;
        };

        match apply(state, &record, transition).await {
            Ok(Outcome::Applied) => {
                tracing::info!(
                    panel = %record.panel_id,
                    username = %record.username,
                    action = transition.as_str(),
                    "Pending transition applied"
                );
                summary.applied += 1;
            }
            Ok(Outcome::Missing) => {
                tracing::warn!(
                    panel = %record.panel_id,
                    username = %record.username,
                    "Account missing on panel, dropping pending transition"
                );
                state.store.set_pending(record.id, None)?;
                summary.cleared += 1;
            }
            Err(e) => {
                let attempts = state.store.bump_sync_attempts(record.id)?;
                tracing::warn!(
                    panel = %record.panel_id,
                    username = %record.username,
                    attempts,
                    error = %e,
                    "Pending transition failed"
                );
                summary.failed += 1;

                if attempts >= cfg.max_sync_attempts {
                    state.store.set_pending(record.id, None)?;
                    give_up(state, &record, transition, attempts, &e).await;
                    summary.gave_up += 1;
                }
            }
        }
    }

    if summary != SyncSummary::default() {
        tracing::debug!(?summary, "Sync tick finished");
    }
    Ok(summary)
}

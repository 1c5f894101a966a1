//! Notification sweep: mirrors live status onto records and sends
//! low-volume / low-time warnings once per service.

use std::collections::HashSet;

use crate::error::AppResult;
use crate::models::{Account, AccountStatus, ServiceRecord, ServiceStatus};
use crate::modules::notifier::notify_user;
use crate::panel::status::{gb_to_bytes, now_secs};
use crate::utils::format::format_bytes;
use crate::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub checked: usize,
    pub volume_warnings: usize,
    pub time_warnings: usize,
    /// Records whose status changed
    pub mirrored: usize,
    pub failed: usize,
}

async fn warn_user(state: &AppState, record: &ServiceRecord, key: &str, args: &[(&str, String)]) -> bool {
    match notify_user(
        state.store.as_ref(),
        state.notifier.as_ref(),
        &state.config.language,
        record.user_id,
        key,
        args,
    )
    .await
    {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(user_id = record.user_id, key, error = %e, "Warning not delivered");
            false
        }
    }
}

async fn check(state: &AppState, record: &ServiceRecord, account: &Account, now: i64, summary: &mut SweepSummary) -> AppResult<()> {
    let cfg = &state.config.scheduler;
    let live = ServiceStatus::from(account.status);
    if live != record.status {
        state.store.update_status(record.id, live, now)?;
        summary.mirrored += 1;
        tracing::info!(
            panel = %record.panel_id,
            username = %record.username,
            from = record.status.as_str(),
            to = live.as_str(),
            "Service status mirrored"
        );
    }

    // Warnings only make sense while the account can still carry traffic
    if account.status != AccountStatus::Active {
        return Ok(());
    }

    if !record.volume_sent {
        let threshold = gb_to_bytes(cfg.volume_threshold_gb);
        if let Some(remaining) = account.remaining_traffic() {
            if remaining <= threshold {
                let args = [
                    ("username", record.username.clone()),
                    ("remaining", format_bytes(remaining)),
                ];
                if warn_user(state, record, "volume_warning", &args).await {
                    state.store.mark_volume_sent(record.id)?;
                    summary.volume_warnings += 1;
                }
            }
        }
    }

    if !record.time_sent {
        if let Some(days) = account.remaining_days(now) {
            if days <= cfg.days_threshold {
                let args = [
                    ("username", record.username.clone()),
                    ("days", days.to_string()),
                ];
                if warn_user(state, record, "time_warning", &args).await {
                    state.store.mark_time_sent(record.id)?;
                    summary.time_warnings += 1;
                }
            }
        }
    }

    Ok(())
}

/// One sweep over live records (active, on hold or disabled) whose last check
/// is older than the cooldown.
/// A record is marked checked even when the vendor call fails, so it is
/// retried after the next cooldown rather than on every tick.
pub async fn run_once(state: &AppState) -> AppResult<SweepSummary> {
    let cfg = &state.config.scheduler;
    let now = now_secs();
    let cutoff = now - cfg.notify_cooldown as i64;
    let candidates = state.store.sweep_candidates(cutoff, cfg.notify_batch_size)?;

    let mut summary = SweepSummary::default();
    // Panels that already failed this tick are not retried for every record
    let mut down: HashSet<String> = HashSet::new();

    for record in candidates {
        state.store.mark_checked(record.id, now)?;
        if down.contains(&record.panel_id) {
            summary.failed += 1;
            continue;
        }

        let client = match state.client(&record.panel_id).await {
            Ok((_, client)) => client,
            Err(e) => {
                tracing::warn!(panel = %record.panel_id, error = %e, "Panel unavailable for sweep");
                down.insert(record.panel_id.clone());
                summary.failed += 1;
                continue;
            }
        };

        let account = match client.get_account(&record.username).await {
            Ok(account) => account,
            Err(e) if e.is_not_found() => {
                tracing::debug!(panel = %record.panel_id, username = %record.username, "Account missing, skipped");
                continue;
            }
            Err(e) => {
                let e = state.panel_failure(&record.panel_id, e);
                tracing::warn!(panel = %record.panel_id, username = %record.username, error = %e, "Sweep fetch failed");
                summary.failed += 1;
                continue;
            }
        };

        summary.checked += 1;
        if let Err(e) = check(state, &record, &account, now, &mut summary).await {
            tracing::warn!(username = %record.username, error = %e, "Sweep update failed");
            summary.failed += 1;
        }
    }

    if summary != SweepSummary::default() {
        tracing::debug!(?summary, "Notification sweep finished");
    }
    Ok(summary)
}

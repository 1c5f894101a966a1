//! Reminds owners of on-hold services that were never started.

use crate::error::AppResult;
use crate::models::{AccountStatus, ServiceStatus};
use crate::modules::notifier::notify_user;
use crate::panel::status::{days_to_secs, now_secs};
use crate::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OnHoldSummary {
    pub reminded: usize,
    /// Started in the meantime; record status corrected instead
    pub started: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn run_once(state: &AppState) -> AppResult<OnHoldSummary> {
    let now = now_secs();
    let created_before = now - days_to_secs(state.config.scheduler.on_hold_days);
    let mut summary = OnHoldSummary::default();

    for record in state.store.on_hold_candidates(created_before)? {
        if state.store.has_location_change(&record.username)? {
            summary.skipped += 1;
            continue;
        }

        let client = match state.client(&record.panel_id).await {
            Ok((_, client)) => client,
            Err(e) => {
                tracing::warn!(panel = %record.panel_id, error = %e, "Panel unavailable for on-hold check");
                summary.failed += 1;
                continue;
            }
        };

        let account = match client.get_account(&record.username).await {
            Ok(account) => account,
            Err(e) => {
                let e = state.panel_failure(&record.panel_id, e);
                tracing::warn!(username = %record.username, error = %e, "On-hold check failed");
                summary.failed += 1;
                continue;
            }
        };

        if account.status != AccountStatus::OnHold {
            state
                .store
                .update_status(record.id, ServiceStatus::from(account.status), now)?;
            summary.started += 1;
            continue;
        }

        match notify_user(
            state.store.as_ref(),
            state.notifier.as_ref(),
            &state.config.language,
            record.user_id,
            "on_hold_reminder",
            &[("username", record.username.clone())],
        )
        .await
        {
            Ok(()) => {
                state.store.mark_on_hold_reminded(record.id)?;
                summary.reminded += 1;
            }
            Err(e) => {
                tracing::warn!(user_id = record.user_id, error = %e, "On-hold reminder not delivered");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

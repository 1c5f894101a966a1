//! Grace-period purge of services that stayed expired or limited.

use crate::error::AppResult;
use crate::models::{ServiceRecord, ServiceStatus};
use crate::modules::notifier::notify_user;
use crate::panel::status::{days_to_secs, now_secs};
use crate::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeSummary {
    pub purged: usize,
    /// Held back by a pending location change
    pub skipped: usize,
    /// Extended or topped up on the panel since it ended; record updated instead
    pub revived: usize,
    pub failed: usize,
}

enum Outcome {
    Purged,
    Revived(ServiceStatus),
}

async fn purge(state: &AppState, record: &ServiceRecord) -> AppResult<Outcome> {
    let (_, client) = state.client(&record.panel_id).await?;
    let fail = |e| state.panel_failure(&record.panel_id, e);

    match client.get_account(&record.username).await {
        Ok(account) => {
            let live = ServiceStatus::from(account.status);
            if !live.is_ended() {
                state.store.update_status(record.id, live, now_secs())?;
                return Ok(Outcome::Revived(live));
            }
            match client.delete_account(&record.username).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(fail(e)),
            }
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(fail(e)),
    }
    state.store.delete_service(record.id)?;
    Ok(Outcome::Purged)
}

pub async fn run_once(state: &AppState) -> AppResult<PurgeSummary> {
    let grace_days = state.config.scheduler.purge_grace_days;
    let cutoff = now_secs() - days_to_secs(grace_days);
    let mut summary = PurgeSummary::default();

    for record in state.store.ended_before(cutoff)? {
        if state.store.has_location_change(&record.username)? {
            summary.skipped += 1;
            continue;
        }

        match purge(state, &record).await {
            Ok(Outcome::Purged) => {}
            Ok(Outcome::Revived(live)) => {
                tracing::info!(
                    panel = %record.panel_id,
                    username = %record.username,
                    status = live.as_str(),
                    "Service live again on panel, not purged"
                );
                summary.revived += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(panel = %record.panel_id, username = %record.username, error = %e, "Purge failed");
                summary.failed += 1;
                continue;
            }
        }

        tracing::info!(
            panel = %record.panel_id,
            username = %record.username,
            status = record.status.as_str(),
            "Service purged after grace period"
        );
        summary.purged += 1;

        let args = [
            ("username", record.username.clone()),
            ("days", grace_days.to_string()),
        ];
        if let Err(e) = notify_user(
            state.store.as_ref(),
            state.notifier.as_ref(),
            &state.config.language,
            record.user_id,
            "purge_notice",
            &args,
        )
        .await
        {
            tracing::warn!(user_id = record.user_id, error = %e, "Purge notice not delivered");
        }
    }

    Ok(summary)
}

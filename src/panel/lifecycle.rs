//! Subscription extension on top of the account primitives.

use super::error::PanelResult;
use super::status;
use super::traits::PanelClient;
use crate::models::{Account, AccountPatch, AccountStatus, ExtendMethod};

/// What a renewal adds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extension {
    /// Bytes, 0 = unlimited
    pub data_limit: u64,
    pub days: u32,
}

/// Patch that applies `ext` to `current` under `method`
pub fn extension_patch(current: &Account, method: ExtendMethod, ext: Extension, now: i64) -> AccountPatch {
    let from_expiry = if current.expire_time > now {
        current.expire_time
    } else {
        now
    };

    let (data_limit, expire_time) = match method {
        ExtendMethod::ResetAndAdd => (ext.data_limit, status::expiry_from_days(now, ext.days)),
        ExtendMethod::AddToRemaining => {
            let limit = if ext.data_limit == 0 || current.data_limit == 0 {
                0
            } else {
                current.data_limit.saturating_add(ext.data_limit)
            };
            (limit, status::expiry_from_days(from_expiry, ext.days))
        }
        ExtendMethod::ResetVolumeAddTime => {
            (ext.data_limit, status::expiry_from_days(from_expiry, ext.days))
        }
    };

    AccountPatch {
        data_limit: Some(data_limit),
        expire_time: Some(expire_time),
        ..Default::default()
    }
}

/// Renew `username` and re-activate it when the vendor had switched it off.
pub async fn extend_account(
    client: &dyn PanelClient,
    username: &str,
    method: ExtendMethod,
    ext: Extension,
) -> PanelResult<Account> {
    let current = client.get_account(username).await?;
    let now = status::now_secs();

    if matches!(method, ExtendMethod::ResetAndAdd | ExtendMethod::ResetVolumeAddTime) {
        client.reset_usage(username).await?;
    }

    let patch = extension_patch(&current, method, ext, now);
    let mut account = client.modify_account(username, &patch).await?;

    if account.status != AccountStatus::Active && account.status != AccountStatus::OnHold {
        client.enable_account(username).await?;
        account = client.get_account(username).await?;
    }

    tracing::info!(
        panel = %client.panel_id(),
        username = %username,
        method = ?method,
        status = %account.status,
        "Account extended"
    );
    Ok(account)
}

/// Gift top-up: adds on top of what the account has. Unlimited volume and
/// never-expiring accounts are left as they are, and a zero amount
/// leaves the matching field untouched.
pub fn gift_patch(current: &Account, volume: u64, days: u32, now: i64) -> AccountPatch {
    let data_limit = (volume > 0 && current.data_limit > 0)
        .then(|| current.data_limit.saturating_add(volume));
    let expire_time = (days > 0 && current.expire_time > 0)
        .then(|| status::expiry_from_days(current.expire_time.max(now), days));
    AccountPatch {
        data_limit,
        expire_time,
        ..Default::default()
    }
}

/// Apply a gift to `username` and switch the account back on when the vendor had stopped it
pub async fn apply_gift(client: &dyn PanelClient, username: &str, volume: u64, days: u32) -> PanelResult<Account> {
    let current = client.get_account(username).await?;
    let patch = gift_patch(&current, volume, days, status::now_secs());
    if patch.is_empty() {
        return Ok(current);
    }

    let mut account = client.modify_account(username, &patch).await?;
    if account.status != AccountStatus::Active && account.status != AccountStatus::OnHold {
        client.enable_account(username).await?;
        account = client.get_account(username).await?;
    }
    Ok(account)
}

//! Paid-order fulfillment: the single entry point payment collaborators call
//! once funds have cleared.

use crate::error::{AppError, AppResult};
use crate::models::{Account, AccountSpec, Order, OrderKind, ServiceRecord, ServiceStatus};
use crate::modules::notifier::notify_user;
use crate::panel::lifecycle::{extend_account, Extension};
use crate::panel::{credentials, status};
use crate::utils::format::format_bytes;
use crate::AppState;

#[derive(Debug, Clone, PartialEq)]
pub enum OrderAction {
    /// Provision a new account; a username is generated when none is given
    New {
        username: Option<String>,
        on_hold: bool,
        note: String,
    },
    /// Renew an existing account on the same panel
    Extend { username: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaidOrder {
    pub user_id: i64,
    pub panel_id: String,
    pub action: OrderAction,
    pub price: i64,
    pub volume_gb: f64,
    pub days: u32,
}

#[derive(Debug, Clone)]
pub struct Fulfillment {
    pub service_id: i64,
    pub account: Account,
}

fn generated_username(user_id: i64) -> String {
    format!("u{}_{}", user_id, credentials::random_sub_id(5))
}

/// Create or extend the account behind a paid order and record the sale.
/// On failure the buyer gets a localized explanation and the error is returned
/// to the payment collaborator for refund handling.
pub async fn process_paid_order(state: &AppState, order: &PaidOrder) -> AppResult<Fulfillment> {
    match fulfill(state, order).await {
        Ok(fulfillment) => Ok(fulfillment),
        Err(e) => {
            tracing::error!(user_id = order.user_id, panel = %order.panel_id, error = %e, "Order fulfillment failed");
            if let Err(notify_err) = notify_user(
                state.store.as_ref(),
                state.notifier.as_ref(),
                &state.config.language,
                order.user_id,
                e.user_message_key(),
                &[],
            )
            .await
            {
                tracing::warn!(user_id = order.user_id, error = %notify_err, "Failure notice not delivered");
            }
            Err(e)
        }
    }
}

async fn fulfill(state: &AppState, order: &PaidOrder) -> AppResult<Fulfillment> {
    let panel = state
        .store
        .panel(&order.panel_id)?
        .filter(|p| p.active)
        .ok_or_else(|| AppError::Config(format!("panel {} is not available", order.panel_id)))?;
    let now = status::now_secs();
    let data_limit = status::gb_to_bytes(order.volume_gb);

    let fulfillment = match &order.action {
        OrderAction::New {
            username,
            on_hold,
            note,
        } => {
            if let Some(capacity) = panel.capacity {
                let live = state.store.count_live_services(&panel.id)?;
                if live >= capacity as u64 {
                    tracing::warn!(panel = %panel.id, live, capacity, "Panel at capacity, order refused");
                    return Err(AppError::Capacity(panel.id.clone()));
                }
            }

            let username = username
                .clone()
                .unwrap_or_else(|| generated_username(order.user_id));
            let spec = AccountSpec {
                on_hold: *on_hold,
                inbounds: panel.inbounds.clone(),
                note: note.clone(),
                ..AccountSpec::new(username.clone(), data_limit, order.days)
            };

            let client = state.registry.get(&panel).await?;
            let account = client
                .create_account(&spec)
                .await
                .map_err(|e| state.panel_failure(&panel.id, e))?;

            let mut record = ServiceRecord::new(order.user_id, &panel.id, &username);
            record.status = ServiceStatus::from(account.status);
            record.created_at = now;
            let service_id = state.store.insert_service(&record)?;

            if state.store.user_language(order.user_id)?.is_none() {
                state
                    .store
                    .upsert_user(order.user_id, &state.config.language, now)?;
            }

            Fulfillment {
                service_id,
                account,
            }
        }
        OrderAction::Extend { username } => {
            let record = state
                .store
                .service_by_username(&panel.id, username)?
                .ok_or_else(|| AppError::Store(format!("no service {} on {}", username, panel.id)))?;

            let client = state.registry.get(&panel).await?;
            let ext = Extension {
                data_limit,
                days: order.days,
            };
            let account = extend_account(client.as_ref(), username, panel.extend_method, ext)
                .await
                .map_err(|e| state.panel_failure(&panel.id, e))?;

            state
                .store
                .update_status(record.id, ServiceStatus::from(account.status), now)?;
            state.store.reset_warning_flags(record.id)?;
            state.store.set_pending(record.id, None)?;

            Fulfillment {
                service_id: record.id,
                account,
            }
        }
    };

    let kind = match order.action {
        OrderAction::New { .. } => OrderKind::New,
        OrderAction::Extend { .. } => OrderKind::Extend,
    };
    state.store.insert_order(&Order {
        user_id: order.user_id,
        panel_id: panel.id.clone(),
        username: fulfillment.account.username.clone(),
        kind,
        price: order.price,
        volume_gb: order.volume_gb,
        created_at: now,
    })?;

    tracing::info!(
        panel = %panel.id,
        username = %fulfillment.account.username,
        kind = kind.as_str(),
        volume = %format_bytes(data_limit),
        days = order.days,
        "Order fulfilled"
    );

    let (key, args) = match kind {
        OrderKind::New => (
            "order_created",
            vec![
                ("username", fulfillment.account.username.clone()),
                ("link", fulfillment.account.subscription_link.clone()),
            ],
        ),
        OrderKind::Extend => (
            "order_extended",
            vec![("username", fulfillment.account.username.clone())],
        ),
    };
    if let Err(e) = notify_user(
        state.store.as_ref(),
        state.notifier.as_ref(),
        &state.config.language,
        order.user_id,
        key,
        &args,
    )
    .await
    {
        tracing::warn!(user_id = order.user_id, error = %e, "Order confirmation not delivered");
    }

    Ok(fulfillment)
}

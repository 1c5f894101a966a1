use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::account::AccountStatus;

/// Lifecycle status of a sold subscription as recorded locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Disabled,
    Limited,
    Expired,
    OnHold,
    Removed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Disabled => "disabled",
            ServiceStatus::Limited => "limited",
            ServiceStatus::Expired => "expired",
            ServiceStatus::OnHold => "on_hold",
            ServiceStatus::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ServiceStatus::Active),
            "disabled" => Some(ServiceStatus::Disabled),
            "limited" => Some(ServiceStatus::Limited),
            "expired" => Some(ServiceStatus::Expired),
            "on_hold" => Some(ServiceStatus::OnHold),
            "removed" => Some(ServiceStatus::Removed),
            _ => None,
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, ServiceStatus::Expired | ServiceStatus::Limited)
    }
}

impl From<AccountStatus> for ServiceStatus {
    fn from(status: AccountStatus) -> Self {
        match status {
            AccountStatus::Active => ServiceStatus::Active,
            AccountStatus::Disabled => ServiceStatus::Disabled,
            AccountStatus::Limited => ServiceStatus::Limited,
            AccountStatus::Expired => ServiceStatus::Expired,
            AccountStatus::OnHold => ServiceStatus::OnHold,
        }
    }
}

/// Transition requested by an admin or user action, applied by the sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingTransition {
    Enable,
    Disable,
}

impl PendingTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingTransition::Enable => "enable",
            PendingTransition::Disable => "disable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enable" => Some(PendingTransition::Enable),
            "disable" => Some(PendingTransition::Disable),
            _ => None,
        }
    }
}

/// Sold subscription mapped to `(panel, username)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,
    pub user_id: i64,
    pub panel_id: String,
    pub username: String,
    pub status: ServiceStatus,
    pub pending: Option<PendingTransition>,
    pub sync_attempts: u32,
    pub volume_sent: bool,
    pub time_sent: bool,
    pub on_hold_reminded: bool,
    pub last_checked: i64,
    /// When the record was first seen expired/limited, 0 otherwise
    pub ended_at: i64,
    pub created_at: i64,
}

impl ServiceRecord {
    pub fn new(user_id: i64, panel_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: 0,
            user_id,
            panel_id: panel_id.into(),
            username: username.into(),
            status: ServiceStatus::Active,
            pending: None,
            sync_attempts: 0,
            volume_sent: false,
            time_sent: false,
            on_hold_reminded: false,
            last_checked: 0,
            ended_at: 0,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Location change request; blocks purge and on-hold reminders for the username
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationChange {
    pub username: String,
    pub from_panel: String,
    pub to_panel: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    New,
    Extend,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::New => "new",
            OrderKind::Extend => "extend",
        }
    }
}

/// Fulfilled sale, feeds the daily report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub user_id: i64,
    pub panel_id: String,
    pub username: String,
    pub kind: OrderKind,
    pub price: i64,
    pub volume_gb: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelSales {
    pub sales: u64,
    pub revenue: i64,
    pub volume_gb: f64,
    pub extensions: u64,
}

/// Same-day aggregates, overall and per panel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub day: String,
    pub sales: u64,
    pub revenue: i64,
    pub volume_gb: f64,
    pub new_users: u64,
    pub extensions: u64,
    pub per_panel: BTreeMap<String, PanelSales>,
}

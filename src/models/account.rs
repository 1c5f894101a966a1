use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Uniform lifecycle status derived from vendor telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disabled,
    Limited,
    Expired,
    OnHold,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Disabled => "disabled",
            AccountStatus::Limited => "limited",
            AccountStatus::Expired => "expired",
            AccountStatus::OnHold => "on_hold",
        }
    }

    /// Parse a vendor-reported status string. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(AccountStatus::Active),
            "disabled" => Some(AccountStatus::Disabled),
            "limited" => Some(AccountStatus::Limited),
            "expired" => Some(AccountStatus::Expired),
            "on_hold" | "onhold" | "on-hold" => Some(AccountStatus::OnHold),
            _ => None,
        }
    }

    /// Expired or limited: the account can no longer carry traffic until extended
    pub fn is_ended(&self) -> bool {
        matches!(self, AccountStatus::Expired | AccountStatus::Limited)
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-through projection of one vendor account.
///
/// Traffic is always bytes and times are always epoch seconds, whatever the
/// vendor speaks natively. `0` means unlimited for `data_limit` and never for
/// `expire_time` / `last_online`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub status: AccountStatus,
    pub data_limit: u64,
    pub used_traffic: u64,
    pub expire_time: i64,
    pub subscription_link: String,
    pub last_online: i64,
    #[serde(default)]
    pub note: String,
    /// Selected inbound / service identifiers
    #[serde(default)]
    pub inbounds: Vec<String>,
    /// Protocol -> generated credential (uuid or secret)
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
}

impl Account {
    pub fn new(username: impl Into<String>, status: AccountStatus) -> Self {
        Self {
            username: username.into(),
            status,
            data_limit: 0,
            used_traffic: 0,
            expire_time: 0,
            subscription_link: String::new(),
            last_online: 0,
            note: String::new(),
            inbounds: Vec::new(),
            credentials: BTreeMap::new(),
        }
    }

    /// Remaining bytes, `None` when unlimited
    pub fn remaining_traffic(&self) -> Option<u64> {
        if self.data_limit == 0 {
            None
        } else {
            Some(self.data_limit.saturating_sub(self.used_traffic))
        }
    }

    /// Remaining whole days until expiry (floor), `None` when it never expires
    pub fn remaining_days(&self, now: i64) -> Option<i64> {
        if self.expire_time <= 0 {
            None
        } else {
            Some((self.expire_time - now).max(0) / 86_400)
        }
    }
}

/// Parameters for creating an account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSpec {
    pub username: String,
    /// Bytes, 0 = unlimited
    pub data_limit: u64,
    /// Days from creation (or from first use when `on_hold`), 0 = never
    pub expire_days: u32,
    /// Start the expiry clock on first connection instead of now
    #[serde(default)]
    pub on_hold: bool,
    /// Inbound selection; empty uses the panel default
    #[serde(default)]
    pub inbounds: Vec<String>,
    #[serde(default)]
    pub note: String,
}

impl AccountSpec {
    pub fn new(username: impl Into<String>, data_limit: u64, expire_days: u32) -> Self {
        Self {
            username: username.into(),
            data_limit,
            expire_days,
            ..Default::default()
        }
    }
}

/// Partial modification; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountPatch {
    pub data_limit: Option<u64>,
    /// Absolute epoch seconds, 0 = never
    pub expire_time: Option<i64>,
    pub note: Option<String>,
    pub inbounds: Option<Vec<String>>,
}

impl AccountPatch {
    pub fn is_empty(&self) -> bool {
        self.data_limit.is_none()
            && self.expire_time.is_none()
            && self.note.is_none()
            && self.inbounds.is_none()
    }
}

/// One selectable inbound / service offered by a panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundOption {
    pub id: String,
    pub protocol: String,
    pub label: String,
}

/// Health of a vendor backend node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub name: String,
    pub address: String,
    pub connected: bool,
    #[serde(default)]
    pub message: Option<String>,
}

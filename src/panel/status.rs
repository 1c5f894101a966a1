//! Shared status derivation and unit conversion.
//!
//! Every adapter normalizes its vendor telemetry into [`StatusSignals`]
//! (bytes, epoch seconds) and calls [`derive_status`]; no adapter decides
//! status on its own.

use crate::models::AccountStatus;

pub const GIB: u64 = 1024 * 1024 * 1024;
pub const MIB: u64 = 1024 * 1024;
pub const DAY_SECS: i64 = 86_400;

/// Normalized inputs for status derivation
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusSignals {
    /// Status field reported by the vendor, when it has one
    pub reported: Option<AccountStatus>,
    /// Epoch seconds, 0 = never
    pub expire_time: i64,
    /// Bytes, 0 = unlimited
    pub data_limit: u64,
    pub used_traffic: u64,
    /// Vendor says the clock has not started yet
    pub on_hold: bool,
    /// Raw enable flag (or absence from a disabled list)
    pub enabled: bool,
}

/// expired > limited > on_hold > enable flag.
///
/// A vendor that reports `expired` or `limited` itself is believed. Any other
/// reported status is still checked against expiry and limit.
pub fn derive_status(signals: &StatusSignals, now: i64) -> AccountStatus {
    if let Some(status @ (AccountStatus::Expired | AccountStatus::Limited)) = signals.reported {
        return status;
    }
    if signals.expire_time > 0 && signals.expire_time <= now {
        return AccountStatus::Expired;
    }
    if signals.data_limit > 0 && signals.used_traffic >= signals.data_limit {
        return AccountStatus::Limited;
    }
    if signals.on_hold || signals.reported == Some(AccountStatus::OnHold) {
        return AccountStatus::OnHold;
    }

    match signals.reported {
        Some(AccountStatus::Active) => AccountStatus::Active,
        Some(AccountStatus::Disabled) => AccountStatus::Disabled,
        _ if signals.enabled => AccountStatus::Active,
        _ => AccountStatus::Disabled,
    }
}

pub fn gb_to_bytes(gb: f64) -> u64 {
    if gb <= 0.0 || !gb.is_finite() {
        0
    } else {
        (gb * GIB as f64).round() as u64
    }
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

pub fn mb_to_bytes(mb: f64) -> u64 {
    if mb <= 0.0 || !mb.is_finite() {
        0
    } else {
        (mb * MIB as f64).round() as u64
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / MIB as f64
}

pub fn days_to_secs(days: i64) -> i64 {
    days.saturating_mul(DAY_SECS)
}

/// Millisecond epoch to second epoch; non-positive input maps to 0
pub fn ms_to_secs(ms: i64) -> i64 {
    if ms <= 0 {
        0
    } else {
        ms / 1000
    }
}

pub fn secs_to_ms(secs: i64) -> i64 {
    secs.saturating_mul(1000)
}

/// Absolute expiry for `days` counted from `start`, 0 when `days` is 0
pub fn expiry_from_days(start: i64, days: u32) -> i64 {
    if days == 0 {
        0
    } else {
        start + days_to_secs(days as i64)
    }
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn signals() -> StatusSignals {
        StatusSignals {
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_expired_beats_enable_flag() {
        for enabled in [true, false] {
            let s = StatusSignals {
                expire_time: NOW - 1,
                enabled,
                ..signals()
            };
            assert_eq!(derive_status(&s, NOW), AccountStatus::Expired);
        }
        let s = StatusSignals {
            expire_time: NOW,
            ..signals()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Expired);
    }

    #[test]
    fn test_limited_beats_flags_but_not_expired() {
        let s = StatusSignals {
            data_limit: 10,
            used_traffic: 10,
            enabled: false,
            ..signals()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Limited);

        let s = StatusSignals {
            reported: Some(AccountStatus::Active),
            data_limit: 10,
            used_traffic: 11,
            ..signals()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Limited);

        let s = StatusSignals {
            data_limit: 10,
            used_traffic: 11,
            expire_time: NOW - 100,
            ..signals()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Expired);
    }

    #[test]
    fn test_on_hold_beats_enable_flag_only() {
        let s = StatusSignals {
            on_hold: true,
            enabled: false,
            ..signals()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::OnHold);

        let s = StatusSignals {
            on_hold: true,
            data_limit: 5,
            used_traffic: 5,
            ..signals()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Limited);
    }

    #[test]
    fn test_reported_status_is_checked_against_expiry() {
        let s = StatusSignals {
            reported: Some(AccountStatus::Disabled),
            expire_time: NOW + 1000,
            ..signals()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Disabled);

        let s = StatusSignals {
            reported: Some(AccountStatus::Disabled),
            expire_time: NOW - 1000,
            ..signals()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Expired);

        let s = StatusSignals {
            reported: Some(AccountStatus::Limited),
            expire_time: NOW + 1000,
            ..signals()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Limited);
    }

    #[test]
    fn test_unlimited_active() {
        let s = StatusSignals {
            reported: Some(AccountStatus::Active),
            used_traffic: 5_000_000_000,
            enabled: false,
            ..Default::default()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Active);

        let s = StatusSignals {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(derive_status(&s, NOW), AccountStatus::Disabled);
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(gb_to_bytes(10.0), 10 * GIB);
        assert_eq!(gb_to_bytes(-1.0), 0);
        assert_eq!(ms_to_secs(1_700_000_000_123), 1_700_000_000);
        assert_eq!(ms_to_secs(-86_400_000), 0);
        assert_eq!(expiry_from_days(NOW, 0), 0);
        assert_eq!(expiry_from_days(NOW, 2), NOW + 2 * DAY_SECS);
        assert!((bytes_to_gb(GIB / 2) - 0.5).abs() < f64::EPSILON);
    }
}

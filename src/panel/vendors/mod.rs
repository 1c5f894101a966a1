//! Vendor adapters, one per panel family.

pub mod hiddify;
pub mod ibsng;
pub mod marzban;
pub mod marzneshin;
pub mod xui;

pub use hiddify::HiddifyClient;
pub use ibsng::IbsngClient;
pub use marzban::MarzbanClient;
pub use marzneshin::MarzneshinClient;
pub use xui::XuiClient;

/// Lenient numeric decoding: vendors mix ints, floats, numeric strings and null
pub(crate) mod de {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn flex_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(as_f64(&value).filter(|v| *v > 0.0).map(|v| v as u64).unwrap_or(0))
    }

    pub fn flex_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(as_f64(&value).map(|v| v as i64).unwrap_or(0))
    }

    pub fn flex_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(as_f64(&value).unwrap_or(0.0))
    }

    pub fn flex_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(match value {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
            Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
            _ => false,
        })
    }
}

/// Parse the timestamp shapes vendors emit (RFC 3339, naive ISO assumed UTC,
/// plain dates) into epoch seconds
pub(crate) fn parse_timestamp(value: &str) -> Option<i64> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};

    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

//! Per-protocol credential generation for new accounts.

use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use uuid::Uuid;

/// Credential shape a protocol expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Uuid(String),
    Secret(String),
}

impl Credential {
    pub fn value(&self) -> &str {
        match self {
            Credential::Uuid(v) | Credential::Secret(v) => v,
        }
    }

    /// Field name the Xray-family vendors use for this credential
    pub fn field(&self) -> &'static str {
        match self {
            Credential::Uuid(_) => "id",
            Credential::Secret(_) => "password",
        }
    }
}

/// Fresh credential for `protocol`; never reused across accounts
pub fn generate(protocol: &str) -> Credential {
    match protocol.to_ascii_lowercase().as_str() {
        "trojan" | "shadowsocks" | "ss" => Credential::Secret(random_secret(18)),
        _ => Credential::Uuid(Uuid::new_v4().to_string()),
    }
}

/// Field name the Xray-family vendors expect for `protocol`
pub fn field_for(protocol: &str) -> &'static str {
    match protocol.to_ascii_lowercase().as_str() {
        "trojan" | "shadowsocks" | "ss" => "password",
        _ => "id",
    }
}

/// URL-safe random token of `bytes` entropy bytes
pub fn random_secret(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// Lowercase alphanumeric id, used for subscription ids
pub fn random_sub_id(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

use serde::{Deserialize, Serialize};

/// Closed set of supported panel families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorKind {
    Marzban,
    Marzneshin,
    Xui,
    Hiddify,
    Ibsng,
}

impl VendorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorKind::Marzban => "marzban",
            VendorKind::Marzneshin => "marzneshin",
            VendorKind::Xui => "xui",
            VendorKind::Hiddify => "hiddify",
            VendorKind::Ibsng => "ibsng",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "marzban" => Some(VendorKind::Marzban),
            "marzneshin" => Some(VendorKind::Marzneshin),
            "xui" | "x-ui" | "3x-ui" | "sanaei" => Some(VendorKind::Xui),
            "hiddify" => Some(VendorKind::Hiddify),
            "ibsng" => Some(VendorKind::Ibsng),
            _ => None,
        }
    }
}

impl std::fmt::Display for VendorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a purchased extension is applied to an existing account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtendMethod {
    /// Reset usage, limit = purchased volume, expiry = now + days
    #[default]
    ResetAndAdd,
    /// Limit += purchased volume, expiry = max(now, expiry) + days
    AddToRemaining,
    /// Reset usage, limit = purchased volume, expiry = max(now, expiry) + days
    ResetVolumeAddTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelCredentials {
    Password { username: String, password: String },
    Token { token: String },
}

/// Connection record for one panel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    pub id: String,
    pub name: String,
    pub vendor: VendorKind,
    pub base_url: String,
    pub credentials: PanelCredentials,
    /// Max live service records hosted on this panel
    #[serde(default)]
    pub capacity: Option<u32>,
    /// Default inbound selection (tags, inbound ids or service ids)
    #[serde(default)]
    pub inbounds: Vec<String>,
    #[serde(default)]
    pub extend_method: ExtendMethod,
    #[serde(default)]
    pub custom_volume: bool,
    /// Rewrites subscription links onto this scheme://host[:port]
    #[serde(default)]
    pub subscription_domain: Option<String>,
    /// Vendor client path (Hiddify secret path, IBSng group name)
    #[serde(default)]
    pub secret_path: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl PanelConfig {
    pub fn new(
        id: impl Into<String>,
        vendor: VendorKind,
        base_url: impl Into<String>,
        credentials: PanelCredentials,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            vendor,
            base_url: base_url.into(),
            credentials,
            capacity: None,
            inbounds: Vec::new(),
            extend_method: ExtendMethod::default(),
            custom_volume: false,
            subscription_domain: None,
            secret_path: None,
            active: true,
        }
    }

    /// Base URL without a trailing slash
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Host and port probed by the health job
    pub fn probe_target(&self) -> Option<(String, u16)> {
        let url = url::Url::parse(&self.base_url).ok()?;
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        Some((host, port))
    }
}

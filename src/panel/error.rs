//! Vendor failure taxonomy shared by every adapter.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PanelError {
    /// Credentials or session rejected; the cached client is dropped
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Account absent on the vendor
    #[error("account not found: {0}")]
    NotFound(String),

    /// Structured business error returned by the vendor
    #[error("vendor rejected request: {0}")]
    VendorRejected(String),

    /// Network failure or timeout
    #[error("transport error: {0}")]
    Transport(String),
}

impl PanelError {
    pub fn is_auth(&self) -> bool {
        matches!(self, PanelError::AuthFailed(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PanelError::NotFound(_))
    }

    pub fn user_message_key(&self) -> &'static str {
        match self {
            PanelError::AuthFailed(_) | PanelError::Transport(_) => "err_panel_unavailable",
            PanelError::NotFound(_) => "err_account_missing",
            PanelError::VendorRejected(_) => "err_panel_rejected",
        }
    }
}

impl From<reqwest::Error> for PanelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PanelError::VendorRejected(format!("malformed response: {}", e))
        } else {
            PanelError::Transport(e.to_string())
        }
    }
}

pub type PanelResult<T> = Result<T, PanelError>;

//! Vendor adapter construction.

use std::sync::Arc;

use super::traits::PanelClient;
use super::vendors::{HiddifyClient, IbsngClient, MarzbanClient, MarzneshinClient, XuiClient};
use crate::models::config::HttpConfig;
use crate::models::{PanelConfig, VendorKind};
use crate::utils::http::create_client;

/// Builds an unauthenticated adapter for a panel configuration.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, panel: &PanelConfig) -> Arc<dyn PanelClient>;
}

/// Picks the adapter by vendor tag
pub struct DefaultFactory {
    http: HttpConfig,
    /// Shared by the token/API-key vendors; cookie vendors get their own jar
    shared: reqwest::Client,
}

impl DefaultFactory {
    pub fn new(http: HttpConfig) -> Self {
        let shared = create_client(&http, false);
        Self { http, shared }
    }
}

impl AdapterFactory for DefaultFactory {
    fn build(&self, panel: &PanelConfig) -> Arc<dyn PanelClient> {
        let panel = panel.clone();
        tracing::debug!(panel = %panel.id, vendor = %panel.vendor, "Building panel adapter");
        match panel.vendor {
            VendorKind::Marzban => Arc::new(MarzbanClient::new(panel, self.shared.clone())),
            VendorKind::Marzneshin => Arc::new(MarzneshinClient::new(panel, self.shared.clone())),
            VendorKind::Hiddify => Arc::new(HiddifyClient::new(panel, self.shared.clone())),
            VendorKind::Xui => Arc::new(XuiClient::new(panel, create_client(&self.http, true))),
            VendorKind::Ibsng => Arc::new(IbsngClient::new(panel, create_client(&self.http, true))),
        }
    }
}

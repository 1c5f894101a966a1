//! Account capability contract every vendor adapter satisfies.

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::error::PanelResult;
use crate::models::{Account, AccountPatch, AccountSpec, InboundOption, NodeHealth, VendorKind};

/// Uniform account lifecycle operations against one panel.
///
/// Adapters translate each call into vendor HTTP traffic and return the
/// parsed [`Account`] projection. Dropping a returned future abandons the
/// call; every request is additionally bounded by the HTTP client timeout.
#[async_trait]
pub trait PanelClient: Send + Sync {
    /// Vendor family of this adapter.
    fn vendor(&self) -> VendorKind;

    /// Identifier of the panel configuration this adapter was built from.
    fn panel_id(&self) -> &str;

    /// Acquire (or refresh) the vendor session.
    async fn authenticate(&self) -> PanelResult<()>;

    /// Fetch live account state, `NotFound` when the vendor has no such user.
    async fn get_account(&self, username: &str) -> PanelResult<Account>;

    async fn create_account(&self, spec: &AccountSpec) -> PanelResult<Account>;

    async fn modify_account(&self, username: &str, patch: &AccountPatch) -> PanelResult<Account>;

    /// Idempotent: deleting a missing account succeeds.
    async fn delete_account(&self, username: &str) -> PanelResult<()>;

    /// Idempotent.
    async fn enable_account(&self, username: &str) -> PanelResult<()>;

    /// Idempotent.
    async fn disable_account(&self, username: &str) -> PanelResult<()>;

    /// Idempotent.
    async fn reset_usage(&self, username: &str) -> PanelResult<()>;

    /// Invalidate the current subscription link and return the new one.
    async fn rotate_subscription_link(&self, username: &str) -> PanelResult<String>;

    async fn list_inbound_options(&self) -> PanelResult<Vec<InboundOption>>;

    async fn system_stats(&self) -> PanelResult<BTreeMap<String, serde_json::Value>>;

    async fn subscription_link(&self, username: &str) -> PanelResult<String> {
        Ok(self.get_account(username).await?.subscription_link)
    }

    /// Backend nodes behind this panel. Vendors without nodes report none.
    async fn list_nodes(&self) -> PanelResult<Vec<NodeHealth>> {
        Ok(Vec::new())
    }
}

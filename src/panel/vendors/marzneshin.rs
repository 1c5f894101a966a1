// Marzneshin adapter: JSON REST, bearer token from /api/admins/token.
// Status comes as booleans; "start_on_first_use" users are on hold until activated.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{de, parse_timestamp};
use crate::models::{
    Account, AccountPatch, AccountSpec, AccountStatus, InboundOption, NodeHealth, PanelConfig,
    PanelCredentials, VendorKind,
};
use crate::panel::error::{PanelError, PanelResult};
use crate::panel::http::{apply_subscription_domain, VendorHttp};
use crate::panel::status::{self, derive_status, StatusSignals};
use crate::panel::traits::PanelClient;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct MarzneshinUser {
    username: String,
    #[serde(default)]
    expire_strategy: String,
    #[serde(default)]
    expire_date: Option<String>,
    #[serde(default, deserialize_with = "de::flex_u64")]
    data_limit: u64,
    #[serde(default, deserialize_with = "de::flex_u64")]
    used_traffic: u64,
    #[serde(default, deserialize_with = "de::flex_bool")]
    enabled: bool,
    #[serde(default, deserialize_with = "de::flex_bool")]
    expired: bool,
    #[serde(default, deserialize_with = "de::flex_bool")]
    data_limit_reached: bool,
    #[serde(default, deserialize_with = "de::flex_bool")]
    activated: bool,
    #[serde(default)]
    subscription_url: String,
    #[serde(default)]
    online_at: Option<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    service_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct MarzneshinService {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inbound_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct MarzneshinNode {
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct MarzneshinClient {
    panel: PanelConfig,
    http: VendorHttp,
    token: RwLock<Option<String>>,
}

fn format_date(epoch: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(epoch, 0).map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}

impl MarzneshinClient {
    pub fn new(panel: PanelConfig, client: reqwest::Client) -> Self {
        let http = VendorHttp::new(client, &panel.base_url);
        Self {
            panel,
            http,
            token: RwLock::new(None),
        }
    }

    async fn bearer(&self) -> PanelResult<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.authenticate().await?;
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| PanelError::AuthFailed("no session token".to_string()))
    }

    async fn send_authed<T, F>(&self, build: F) -> PanelResult<T>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let token = self.bearer().await?;
        let result = self
            .http
            .send_json(build(self.http.client()).bearer_auth(token))
            .await;
        if let Err(PanelError::AuthFailed(_)) = &result {
            *self.token.write().await = None;
        }
        result
    }

    fn user_url(&self, username: &str, action: Option<&str>) -> String {
        match action {
            Some(action) => self.http.url(&format!("/api/users/{}/{}", username, action)),
            None => self.http.url(&format!("/api/users/{}", username)),
        }
    }

    fn to_account(&self, user: MarzneshinUser, now: i64) -> Account {
        let reported = if user.expired {
            Some(AccountStatus::Expired)
        } else if user.data_limit_reached {
            Some(AccountStatus::Limited)
        } else {
            None
        };
        let on_hold = user.expire_strategy == "start_on_first_use" && !user.activated;
        let expire_time = if user.expire_strategy == "fixed_date" {
            user.expire_date.as_deref().and_then(parse_timestamp).unwrap_or(0)
        } else {
            0
        };

        let signals = StatusSignals {
            reported,
            expire_time,
            data_limit: user.data_limit,
            used_traffic: user.used_traffic,
            on_hold,
            enabled: user.enabled,
        };

        let mut account = Account::new(user.username, derive_status(&signals, now));
        account.data_limit = user.data_limit;
        account.used_traffic = user.used_traffic;
        account.expire_time = expire_time;
        account.last_online = user
            .online_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(0);
        account.note = user.note.unwrap_or_default();
        account.subscription_link = apply_subscription_domain(
            &user.subscription_url,
            self.panel.subscription_domain.as_deref(),
            self.http.base(),
        );
        account.inbounds = user.service_ids.iter().map(|id| id.to_string()).collect();
        if let Some(key) = user.key {
            account.credentials.insert("key".to_string(), key);
        }
        account
    }

    async fn fetch_services(&self) -> PanelResult<Vec<MarzneshinService>> {
        let url = self.http.url("/api/services");
        let page: Page<MarzneshinService> =
            self.send_authed(|c| c.get(&url).query(&[("size", "100")])).await?;
        Ok(page.items)
    }

    /// Configured service ids, or every service when the selection is empty
    async fn resolve_services(&self, selection: &[String]) -> PanelResult<Vec<i64>> {
        let parsed: Vec<i64> = selection.iter().filter_map(|s| s.trim().parse().ok()).collect();
        if !parsed.is_empty() {
            return Ok(parsed);
        }
        let all: Vec<i64> = self.fetch_services().await?.into_iter().map(|s| s.id).collect();
        if all.is_empty() {
            return Err(PanelError::VendorRejected("panel has no services".to_string()));
        }
        Ok(all)
    }

    /// Enable/disable answer 4xx when the user is already in that state
    async fn toggle(&self, username: &str, action: &str) -> PanelResult<()> {
        let url = self.user_url(username, Some(action));
        match self.send_authed::<Value, _>(|c| c.post(&url)).await {
            Ok(_) => Ok(()),
            Err(PanelError::VendorRejected(detail)) if detail.to_lowercase().contains("already") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl PanelClient for MarzneshinClient {
    fn vendor(&self) -> VendorKind {
        VendorKind::Marzneshin
    }

    fn panel_id(&self) -> &str {
        &self.panel.id
    }

    async fn authenticate(&self) -> PanelResult<()> {
        let token = match &self.panel.credentials {
            PanelCredentials::Password { username, password } => {
                let response: TokenResponse = self
                    .http
                    .send_json(
                        self.http
                            .client()
                            .post(self.http.url("/api/admins/token"))
                            .form(&[("username", username.as_str()), ("password", password.as_str())]),
                    )
                    .await
                    .map_err(|e| match e {
                        PanelError::NotFound(d) | PanelError::VendorRejected(d) => {
                            PanelError::AuthFailed(d)
                        }
                        other => other,
                    })?;
                response.access_token
            }
            PanelCredentials::Token { token } => {
                let _: Value = self
                    .http
                    .send_json(
                        self.http
                            .client()
                            .get(self.http.url("/api/admins/current"))
                            .bearer_auth(token),
                    )
                    .await?;
                token.clone()
            }
        };
        *self.token.write().await = Some(token);
        tracing::debug!(panel = %self.panel.id, "Marzneshin session established");
        Ok(())
    }

    async fn get_account(&self, username: &str) -> PanelResult<Account> {
        let url = self.user_url(username, None);
        let user: MarzneshinUser = self.send_authed(|c| c.get(&url)).await?;
        Ok(self.to_account(user, status::now_secs()))
    }

    async fn create_account(&self, spec: &AccountSpec) -> PanelResult<Account> {
        let selection = if spec.inbounds.is_empty() {
            &self.panel.inbounds
        } else {
            &spec.inbounds
        };
        let service_ids = self.resolve_services(selection).await?;

        let mut body = json!({
            "username": spec.username,
            "data_limit": spec.data_limit,
            "data_limit_reset_strategy": "no_reset",
            "service_ids": service_ids,
            "note": spec.note,
        });
        if spec.expire_days == 0 {
            body["expire_strategy"] = json!("never");
        } else if spec.on_hold {
            body["expire_strategy"] = json!("start_on_first_use");
            body["usage_duration"] = json!(status::days_to_secs(spec.expire_days as i64));
        } else {
            body["expire_strategy"] = json!("fixed_date");
            body["expire_date"] =
                json!(format_date(status::expiry_from_days(status::now_secs(), spec.expire_days)));
        }

        let url = self.http.url("/api/users");
        let user: MarzneshinUser = self.send_authed(|c| c.post(&url).json(&body)).await?;
        tracing::info!(panel = %self.panel.id, username = %spec.username, "Marzneshin account created");
        Ok(self.to_account(user, status::now_secs()))
    }

    async fn modify_account(&self, username: &str, patch: &AccountPatch) -> PanelResult<Account> {
        if patch.is_empty() {
            return self.get_account(username).await;
        }

        let mut body = Map::new();
        body.insert("username".into(), json!(username));
        if let Some(limit) = patch.data_limit {
            body.insert("data_limit".into(), json!(limit));
        }
        if let Some(expire) = patch.expire_time {
            if expire <= 0 {
                body.insert("expire_strategy".into(), json!("never"));
            } else {
                body.insert("expire_strategy".into(), json!("fixed_date"));
                body.insert("expire_date".into(), json!(format_date(expire)));
            }
        }
        if let Some(note) = &patch.note {
            body.insert("note".into(), json!(note));
        }
        if let Some(selection) = &patch.inbounds {
            body.insert("service_ids".into(), json!(self.resolve_services(selection).await?));
        }

        let url = self.user_url(username, None);
        let body = Value::Object(body);
        let user: MarzneshinUser = self.send_authed(|c| c.put(&url).json(&body)).await?;
        Ok(self.to_account(user, status::now_secs()))
    }

    async fn delete_account(&self, username: &str) -> PanelResult<()> {
        let url = self.user_url(username, None);
        match self.send_authed::<Value, _>(|c| c.delete(&url)).await {
            Ok(_) | Err(PanelError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn enable_account(&self, username: &str) -> PanelResult<()> {
        self.toggle(username, "enable").await
    }

    async fn disable_account(&self, username: &str) -> PanelResult<()> {
        self.toggle(username, "disable").await
    }

    async fn reset_usage(&self, username: &str) -> PanelResult<()> {
        let url = self.user_url(username, Some("reset"));
        let _: Value = self.send_authed(|c| c.post(&url)).await?;
        Ok(())
    }

    async fn rotate_subscription_link(&self, username: &str) -> PanelResult<String> {
        let url = self.user_url(username, Some("revoke_sub"));
        let user: MarzneshinUser = self.send_authed(|c| c.post(&url)).await?;
        Ok(self.to_account(user, status::now_secs()).subscription_link)
    }

    async fn list_inbound_options(&self) -> PanelResult<Vec<InboundOption>> {
        Ok(self
            .fetch_services()
            .await?
            .into_iter()
            .map(|s| InboundOption {
                id: s.id.to_string(),
                protocol: "service".to_string(),
                label: format!("{} ({} inbounds)", s.name, s.inbound_ids.len()),
            })
            .collect())
    }

    async fn system_stats(&self) -> PanelResult<BTreeMap<String, Value>> {
        let url = self.http.url("/api/system/stats/users");
        self.send_authed(|c| c.get(&url)).await
    }

    async fn list_nodes(&self) -> PanelResult<Vec<NodeHealth>> {
        let url = self.http.url("/api/nodes");
        let page: Page<MarzneshinNode> =
            self.send_authed(|c| c.get(&url).query(&[("size", "100")])).await?;
        Ok(page
            .items
            .into_iter()
            .filter(|n| n.status != "disabled")
            .map(|n| NodeHealth {
                connected: n.status == "healthy",
                name: n.name,
                address: n.address,
                message: n.message,
            })
            .collect())
    }
}

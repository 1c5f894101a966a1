// Marzban adapter: JSON REST with a bearer token from /api/admin/token.
// The vendor reports status directly, including `on_hold`.

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
use crate::panel::credentials;
use crate::panel::error::{PanelError, PanelResult};
use crate::panel::http::{apply_subscription_domain, VendorHttp};
use crate::panel::status::{self, derive_status, StatusSignals};
use crate::panel::traits::PanelClient;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct MarzbanUser {
    username: String,
    #[serde(default)]
    status: String,
    #[serde(default, deserialize_with = "de::flex_u64")]
    used_traffic: u64,
    #[serde(default, deserialize_with = "de::flex_u64")]
    data_limit: u64,
    #[serde(default, deserialize_with = "de::flex_i64")]
    expire: i64,
    #[serde(default)]
    subscription_url: String,
    #[serde(default)]
    online_at: Option<String>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    proxies: BTreeMap<String, Value>,
    #[serde(default)]
    inbounds: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct MarzbanInbound {
    tag: String,
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    network: String,
    #[serde(default)]
    tls: String,
}

#[derive(Debug, Deserialize)]
struct MarzbanNode {
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct MarzbanClient {
    panel: PanelConfig,
    http: VendorHttp,
    token: RwLock<Option<String>>,
}

impl MarzbanClient {
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

    /// Send with the bearer token; an auth rejection drops the token
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

    fn user_url(&self, username: &str) -> String {
        self.http.url(&format!("/api/user/{}", username))
    }

    fn to_account(&self, user: MarzbanUser, now: i64) -> Account {
        let reported = AccountStatus::parse(&user.status);
        let expire_time = user.expire.max(0);
        let signals = StatusSignals {
            reported,
            expire_time,
            data_limit: user.data_limit,
            used_traffic: user.used_traffic,
            on_hold: reported == Some(AccountStatus::OnHold),
            enabled: reported != Some(AccountStatus::Disabled),
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
        account.inbounds = user.inbounds.into_values().flatten().collect();
        for (protocol, settings) in user.proxies {
            let value = settings
                .get("id")
                .or_else(|| settings.get("password"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            account.credentials.insert(protocol, value);
        }
        account
    }

    async fn fetch_inbounds(&self) -> PanelResult<BTreeMap<String, Vec<MarzbanInbound>>> {
        let url = self.http.url("/api/inbounds");
        self.send_authed(|c| c.get(&url)).await
    }

    /// Group selected tags by protocol; an empty selection means every inbound
    async fn resolve_inbounds(
        &self,
        selection: &[String],
    ) -> PanelResult<BTreeMap<String, Vec<String>>> {
        let available = self.fetch_inbounds().await?;
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (protocol, inbounds) in available {
            for inbound in inbounds {
                if selection.is_empty() || selection.iter().any(|s| s == &inbound.tag) {
                    grouped.entry(protocol.clone()).or_default().push(inbound.tag);
                }
            }
        }

        if grouped.is_empty() {
            return Err(PanelError::VendorRejected(format!(
                "no matching inbounds for selection {:?}",
                selection
            )));
        }
        Ok(grouped)
    }

    fn proxies_for(
        grouped: &BTreeMap<String, Vec<String>>,
        existing: &BTreeMap<String, String>,
    ) -> Map<String, Value> {
        let mut proxies = Map::new();
        for protocol in grouped.keys() {
            let value = match existing.get(protocol).filter(|v| !v.is_empty()) {
                Some(value) => value.clone(),
                None => credentials::generate(protocol).value().to_string(),
            };
            let mut entry = Map::new();
            entry.insert(credentials::field_for(protocol).to_string(), Value::String(value));
            proxies.insert(protocol.clone(), Value::Object(entry));
        }
        proxies
    }

    async fn set_status(&self, username: &str, status: &str) -> PanelResult<()> {
        let url = self.user_url(username);
        let body = json!({ "status": status });
        let _: Value = self.send_authed(|c| c.put(&url).json(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl PanelClient for MarzbanClient {
    fn vendor(&self) -> VendorKind {
        VendorKind::Marzban
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
                            .post(self.http.url("/api/admin/token"))
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
                            .get(self.http.url("/api/admin"))
                            .bearer_auth(token),
                    )
                    .await?;
                token.clone()
            }
        };

        *self.token.write().await = Some(token);
        tracing::debug!(panel = %self.panel.id, "Marzban session established");
        Ok(())
    }

    async fn get_account(&self, username: &str) -> PanelResult<Account> {
        let url = self.user_url(username);
        let user: MarzbanUser = self.send_authed(|c| c.get(&url)).await?;
        Ok(self.to_account(user, status::now_secs()))
    }

    async fn create_account(&self, spec: &AccountSpec) -> PanelResult<Account> {
        let selection = if spec.inbounds.is_empty() {
            &self.panel.inbounds
        } else {
            &spec.inbounds
        };
        let grouped = self.resolve_inbounds(selection).await?;
        let proxies = Self::proxies_for(&grouped, &BTreeMap::new());

        let mut body = json!({
            "username": spec.username,
            "proxies": proxies,
            "inbounds": grouped,
            "data_limit": spec.data_limit,
            "data_limit_reset_strategy": "no_reset",
            "note": spec.note,
        });
        if spec.on_hold && spec.expire_days > 0 {
            body["status"] = json!("on_hold");
            body["expire"] = json!(0);
            body["on_hold_expire_duration"] = json!(status::days_to_secs(spec.expire_days as i64));
        } else {
            body["status"] = json!("active");
            body["expire"] = json!(status::expiry_from_days(status::now_secs(), spec.expire_days));
        }

        let url = self.http.url("/api/user");
        let user: MarzbanUser = self.send_authed(|c| c.post(&url).json(&body)).await?;
        tracing::info!(panel = %self.panel.id, username = %spec.username, "Marzban account created");
        Ok(self.to_account(user, status::now_secs()))
    }

    async fn modify_account(&self, username: &str, patch: &AccountPatch) -> PanelResult<Account> {
        if patch.is_empty() {
            return self.get_account(username).await;
        }

        let mut body = Map::new();
        if let Some(limit) = patch.data_limit {
            body.insert("data_limit".into(), json!(limit));
        }
        if let Some(expire) = patch.expire_time {
            body.insert("expire".into(), json!(expire.max(0)));
        }
        if let Some(note) = &patch.note {
            body.insert("note".into(), json!(note));
        }
        if let Some(selection) = &patch.inbounds {
            let current = self.get_account(username).await?;
            let grouped = self.resolve_inbounds(selection).await?;
            body.insert(
                "proxies".into(),
                Value::Object(Self::proxies_for(&grouped, &current.credentials)),
            );
            body.insert("inbounds".into(), json!(grouped));
        }

        let url = self.user_url(username);
        let body = Value::Object(body);
        let user: MarzbanUser = self.send_authed(|c| c.put(&url).json(&body)).await?;
        Ok(self.to_account(user, status::now_secs()))
    }

    async fn delete_account(&self, username: &str) -> PanelResult<()> {
        let url = self.user_url(username);
        match self.send_authed::<Value, _>(|c| c.delete(&url)).await {
            Ok(_) | Err(PanelError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn enable_account(&self, username: &str) -> PanelResult<()> {
        self.set_status(username, "active").await
    }

    async fn disable_account(&self, username: &str) -> PanelResult<()> {
        self.set_status(username, "disabled").await
    }

    async fn reset_usage(&self, username: &str) -> PanelResult<()> {
        let url = self.http.url(&format!("/api/user/{}/reset", username));
        let _: Value = self.send_authed(|c| c.post(&url)).await?;
        Ok(())
    }

    async fn rotate_subscription_link(&self, username: &str) -> PanelResult<String> {
        let url = self.http.url(&format!("/api/user/{}/revoke_sub", username));
        let user: MarzbanUser = self.send_authed(|c| c.post(&url)).await?;
        Ok(self.to_account(user, status::now_secs()).subscription_link)
    }

    async fn list_inbound_options(&self) -> PanelResult<Vec<InboundOption>> {
        let inbounds = self.fetch_inbounds().await?;
        Ok(inbounds
            .into_iter()
            .flat_map(|(protocol, list)| {
                list.into_iter().map(move |i| InboundOption {
                    label: format!("{} ({}/{})", i.tag, i.network, i.tls),
                    id: i.tag,
                    protocol: if i.protocol.is_empty() {
                        protocol.clone()
                    } else {
                        i.protocol
                    },
                })
            })
            .collect())
    }

    async fn system_stats(&self) -> PanelResult<BTreeMap<String, Value>> {
        let url = self.http.url("/api/system");
        self.send_authed(|c| c.get(&url)).await
    }

    async fn list_nodes(&self) -> PanelResult<Vec<NodeHealth>> {
        let url = self.http.url("/api/nodes");
        let nodes: Vec<MarzbanNode> = self.send_authed(|c| c.get(&url)).await?;
        Ok(nodes
            .into_iter()
            .filter(|n| n.status != "disabled")
            .map(|n| NodeHealth {
                connected: n.status == "connected",
                name: n.name,
                address: n.address,
                message: n.message,
            })
            .collect())
    }
}

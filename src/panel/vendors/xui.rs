// X-UI / 3x-ui adapter: form login with a session cookie, JSON envelopes
// `{success, msg, obj}`. Accounts are clients inside inbounds keyed by email.
//
// expiryTime is a millisecond epoch; a negative value is an on-hold duration
// that starts counting on first connection. `totalGB` is bytes despite its name.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::de;
use crate::models::{
    Account, AccountPatch, AccountSpec, InboundOption, PanelConfig, PanelCredentials, VendorKind,
};
use crate::panel::credentials;
use crate::panel::error::{PanelError, PanelResult};
use crate::panel::http::{classify, truncate, VendorHttp};
use crate::panel::status::{self, derive_status, StatusSignals};
use crate::panel::traits::PanelClient;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    msg: String,
    obj: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientTraffic {
    #[serde(default, deserialize_with = "de::flex_i64")]
    inbound_id: i64,
    #[serde(default, deserialize_with = "de::flex_bool")]
    enable: bool,
    email: String,
    #[serde(default, deserialize_with = "de::flex_u64")]
    up: u64,
    #[serde(default, deserialize_with = "de::flex_u64")]
    down: u64,
    #[serde(default, deserialize_with = "de::flex_i64")]
    expiry_time: i64,
    #[serde(default, deserialize_with = "de::flex_u64")]
    total: u64,
    #[serde(default, deserialize_with = "de::flex_i64")]
    last_online: i64,
}

#[derive(Debug, Deserialize)]
struct XuiInbound {
    id: i64,
    #[serde(default)]
    remark: String,
    #[serde(default)]
    protocol: String,
    #[serde(default, deserialize_with = "de::flex_i64")]
    port: i64,
    /// JSON document encoded as a string
    #[serde(default)]
    settings: String,
}

/// Where a client lives and what it currently looks like
struct ClientEntry {
    inbound_id: i64,
    protocol: String,
    client: Map<String, Value>,
    traffic: ClientTraffic,
}

impl ClientEntry {
    /// Key used by updateClient/delClient: uuid, trojan password or ss email
    fn key(&self) -> String {
        let field = match self.protocol.as_str() {
            "trojan" => "password",
            "shadowsocks" => "email",
            _ => "id",
        };
        self.client
            .get(field)
            .and_then(|v| v.as_str())
            .unwrap_or(&self.traffic.email)
            .to_string()
    }
}

pub struct XuiClient {
    panel: PanelConfig,
    http: VendorHttp,
    logged_in: RwLock<bool>,
}

impl XuiClient {
    /// `client` must carry a cookie store
    pub fn new(panel: PanelConfig, client: reqwest::Client) -> Self {
        let http = VendorHttp::new(client, &panel.base_url);
        Self {
            panel,
            http,
            logged_in: RwLock::new(false),
        }
    }

    async fn ensure_session(&self) -> PanelResult<()> {
        if *self.logged_in.read().await {
            return Ok(());
        }
        self.authenticate().await
    }

    /// Decode an envelope. An HTML body means the session cookie lapsed.
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> PanelResult<Option<T>> {
        self.ensure_session().await?;
        let result = self.call_raw(request).await;
        if let Err(PanelError::AuthFailed(_)) = &result {
            *self.logged_in.write().await = false;
        }
        result
    }

    async fn call_raw<T: DeserializeOwned>(&self, request: RequestBuilder) -> PanelResult<Option<T>> {
        let response = request.send().await.map_err(PanelError::from)?;
        let response = classify(response).await?;
        let text = response.text().await.map_err(PanelError::from)?;

        if text.trim_start().starts_with('<') {
            return Err(PanelError::AuthFailed("session expired".to_string()));
        }
        let envelope: Envelope<T> = serde_json::from_str(&text).map_err(|e| {
            PanelError::VendorRejected(format!("malformed response: {} ({})", e, truncate(&text, 200)))
        })?;
        if !envelope.success {
            return Err(PanelError::VendorRejected(envelope.msg));
        }
        Ok(envelope.obj)
    }

    async fn traffic(&self, username: &str) -> PanelResult<ClientTraffic> {
        let url = self
            .http
            .url(&format!("/panel/api/inbounds/getClientTraffics/{}", username));
        self.call::<ClientTraffic>(self.http.client().get(url))
            .await?
            .ok_or_else(|| PanelError::NotFound(username.to_string()))
    }

    async fn inbound(&self, inbound_id: i64) -> PanelResult<XuiInbound> {
        let url = self.http.url(&format!("/panel/api/inbounds/get/{}", inbound_id));
        self.call::<XuiInbound>(self.http.client().get(url))
            .await?
            .ok_or_else(|| PanelError::VendorRejected(format!("inbound {} missing", inbound_id)))
    }

    fn clients_of(inbound: &XuiInbound) -> PanelResult<Vec<Map<String, Value>>> {
        let settings: Value = serde_json::from_str(&inbound.settings).map_err(|e| {
            PanelError::VendorRejected(format!("inbound {} settings: {}", inbound.id, e))
        })?;
        Ok(settings
            .get("clients")
            .and_then(|c| c.as_array())
            .map(|list| list.iter().filter_map(|c| c.as_object().cloned()).collect())
            .unwrap_or_default())
    }

    async fn locate(&self, username: &str) -> PanelResult<ClientEntry> {
        let traffic = self.traffic(username).await?;
        let inbound = self.inbound(traffic.inbound_id).await?;
        let client = Self::clients_of(&inbound)?
            .into_iter()
            .find(|c| c.get("email").and_then(|e| e.as_str()) == Some(username))
            .ok_or_else(|| PanelError::NotFound(username.to_string()))?;

        Ok(ClientEntry {
            inbound_id: inbound.id,
            protocol: inbound.protocol,
            client,
            traffic,
        })
    }

    fn sub_base(&self) -> String {
        if let Some(domain) = self.panel.subscription_domain.as_deref() {
            if !domain.trim().is_empty() {
                return domain.trim_end_matches('/').to_string();
            }
        }
        match url::Url::parse(&self.panel.base_url) {
            Ok(url) => {
                let host = url.host_str().unwrap_or_default();
                match url.port() {
                    Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                    None => format!("{}://{}", url.scheme(), host),
                }
            }
            Err(_) => self.http.base().to_string(),
        }
    }

    fn to_account(&self, entry: &ClientEntry, now: i64) -> Account {
        let traffic = &entry.traffic;
        let on_hold = traffic.expiry_time < 0;
        let expire_time = status::ms_to_secs(traffic.expiry_time);
        let used = traffic.up.saturating_add(traffic.down);

        let signals = StatusSignals {
            reported: None,
            expire_time,
            data_limit: traffic.total,
            used_traffic: used,
            on_hold,
            enabled: traffic.enable,
        };

        let mut account = Account::new(traffic.email.clone(), derive_status(&signals, now));
        account.data_limit = traffic.total;
        account.used_traffic = used;
        account.expire_time = expire_time;
        account.last_online = status::ms_to_secs(traffic.last_online);
        account.note = entry
            .client
            .get("comment")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        account.inbounds = vec![entry.inbound_id.to_string()];
        if let Some(sub_id) = entry.client.get("subId").and_then(|v| v.as_str()) {
            if !sub_id.is_empty() {
                account.subscription_link = format!("{}/sub/{}", self.sub_base(), sub_id);
            }
        }
        account
            .credentials
            .insert(entry.protocol.clone(), entry.key());
        account
    }

    async fn update_client(&self, entry: &ClientEntry, client: Map<String, Value>) -> PanelResult<()> {
        let settings = json!({ "clients": [Value::Object(client)] }).to_string();
        let url = self
            .http
            .url(&format!("/panel/api/inbounds/updateClient/{}", entry.key()));
        let inbound_id = entry.inbound_id.to_string();
        self.call::<Value>(
            self.http
                .client()
                .post(url)
                .form(&[("id", inbound_id.as_str()), ("settings", settings.as_str())]),
        )
        .await?;
        Ok(())
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> PanelResult<()> {
        let entry = self.locate(username).await?;
        if entry.traffic.enable == enabled {
            return Ok(());
        }
        let mut client = entry.client.clone();
        client.insert("enable".into(), json!(enabled));
        self.update_client(&entry, client).await
    }

    fn inbound_selection(&self, spec: &AccountSpec) -> PanelResult<i64> {
        spec.inbounds
            .iter()
            .chain(self.panel.inbounds.iter())
            .find_map(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| PanelError::VendorRejected("no inbound id configured".to_string()))
    }
}

#[async_trait]
impl PanelClient for XuiClient {
    fn vendor(&self) -> VendorKind {
        VendorKind::Xui
    }

    fn panel_id(&self) -> &str {
        &self.panel.id
    }

    async fn authenticate(&self) -> PanelResult<()> {
        let (username, password) = match &self.panel.credentials {
            PanelCredentials::Password { username, password } => (username, password),
            PanelCredentials::Token { .. } => {
                return Err(PanelError::AuthFailed(
                    "x-ui requires username/password".to_string(),
                ))
            }
        };

        let request = self
            .http
            .client()
            .post(self.http.url("/login"))
            .form(&[("username", username.as_str()), ("password", password.as_str())]);
        match self.call_raw::<Value>(request).await {
            Ok(_) => {
                *self.logged_in.write().await = true;
                tracing::debug!(panel = %self.panel.id, "X-UI session established");
                Ok(())
            }
            Err(PanelError::VendorRejected(msg)) | Err(PanelError::NotFound(msg)) => {
                *self.logged_in.write().await = false;
                Err(PanelError::AuthFailed(msg))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_account(&self, username: &str) -> PanelResult<Account> {
        let entry = self.locate(username).await?;
        Ok(self.to_account(&entry, status::now_secs()))
    }

    async fn create_account(&self, spec: &AccountSpec) -> PanelResult<Account> {
        let inbound_id = self.inbound_selection(spec)?;
        let inbound = self.inbound(inbound_id).await?;
        let credential = credentials::generate(&inbound.protocol);

        let expiry_ms = if spec.expire_days == 0 {
            0
        } else if spec.on_hold {
            -status::secs_to_ms(status::days_to_secs(spec.expire_days as i64))
        } else {
            status::secs_to_ms(status::expiry_from_days(status::now_secs(), spec.expire_days))
        };

        let mut client = Map::new();
        client.insert(credential.field().into(), json!(credential.value()));
        client.insert("email".into(), json!(spec.username));
        client.insert("enable".into(), json!(true));
        client.insert("expiryTime".into(), json!(expiry_ms));
        client.insert("totalGB".into(), json!(spec.data_limit));
        client.insert("limitIp".into(), json!(0));
        client.insert("subId".into(), json!(credentials::random_sub_id(16)));
        client.insert("tgId".into(), json!(""));
        client.insert("flow".into(), json!(""));
        client.insert("reset".into(), json!(0));
        client.insert("comment".into(), json!(spec.note));
        if inbound.protocol == "shadowsocks" {
            client.insert("method".into(), json!(""));
        }

        let settings = json!({ "clients": [Value::Object(client)] }).to_string();
        let id = inbound_id.to_string();
        self.call::<Value>(
            self.http
                .client()
                .post(self.http.url("/panel/api/inbounds/addClient"))
                .form(&[("id", id.as_str()), ("settings", settings.as_str())]),
        )
        .await?;
        tracing::info!(panel = %self.panel.id, username = %spec.username, inbound_id, "X-UI client created");

        self.get_account(&spec.username).await
    }

    async fn modify_account(&self, username: &str, patch: &AccountPatch) -> PanelResult<Account> {
        let entry = self.locate(username).await?;
        if patch.is_empty() {
            return Ok(self.to_account(&entry, status::now_secs()));
        }
        if patch.inbounds.is_some() {
            return Err(PanelError::VendorRejected(
                "x-ui clients cannot move between inbounds".to_string(),
            ));
        }

        let mut client = entry.client.clone();
        if let Some(limit) = patch.data_limit {
            client.insert("totalGB".into(), json!(limit));
        }
        if let Some(expire) = patch.expire_time {
            client.insert("expiryTime".into(), json!(status::secs_to_ms(expire.max(0))));
        }
        if let Some(note) = &patch.note {
            client.insert("comment".into(), json!(note));
        }
        self.update_client(&entry, client).await?;
        self.get_account(username).await
    }

    async fn delete_account(&self, username: &str) -> PanelResult<()> {
        let entry = match self.locate(username).await {
            Ok(entry) => entry,
            Err(PanelError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let url = self.http.url(&format!(
            "/panel/api/inbounds/{}/delClient/{}",
            entry.inbound_id,
            entry.key()
        ));
        self.call::<Value>(self.http.client().post(url)).await?;
        Ok(())
    }

    async fn enable_account(&self, username: &str) -> PanelResult<()> {
        self.set_enabled(username, true).await
    }

    async fn disable_account(&self, username: &str) -> PanelResult<()> {
        self.set_enabled(username, false).await
    }

    async fn reset_usage(&self, username: &str) -> PanelResult<()> {
        let traffic = self.traffic(username).await?;
        let url = self.http.url(&format!(
            "/panel/api/inbounds/{}/resetClientTraffic/{}",
            traffic.inbound_id, username
        ));
        self.call::<Value>(self.http.client().post(url)).await?;
        Ok(())
    }

    async fn rotate_subscription_link(&self, username: &str) -> PanelResult<String> {
        let entry = self.locate(username).await?;
        let sub_id = credentials::random_sub_id(16);
        let mut client = entry.client.clone();
        client.insert("subId".into(), json!(sub_id));
        self.update_client(&entry, client).await?;
        Ok(format!("{}/sub/{}", self.sub_base(), sub_id))
    }

    async fn list_inbound_options(&self) -> PanelResult<Vec<InboundOption>> {
        let inbounds: Vec<XuiInbound> = self
            .call(self.http.client().get(self.http.url("/panel/api/inbounds/list")))
            .await?
            .unwrap_or_default();
        Ok(inbounds
            .into_iter()
            .map(|i| InboundOption {
                id: i.id.to_string(),
                label: format!("{} (:{})", i.remark, i.port),
                protocol: i.protocol,
            })
            .collect())
    }

    async fn system_stats(&self) -> PanelResult<BTreeMap<String, Value>> {
        Ok(self
            .call(self.http.client().post(self.http.url("/server/status")))
            .await?
            .unwrap_or_default())
    }
}

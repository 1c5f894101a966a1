// IBSng adapter: form login with a session cookie and HTML pages scraped with
// regular expressions. Credit is a megabyte allowance.
//
// Expiry is either an absolute date or a relative "N Days" countdown that
// starts at first login; a user who never logged in is on hold.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::RequestBuilder;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::parse_timestamp;
use crate::models::{
    Account, AccountPatch, AccountSpec, InboundOption, PanelConfig, PanelCredentials, VendorKind,
};
use crate::panel::credentials;
use crate::panel::error::{PanelError, PanelResult};
use crate::panel::http::{truncate, VendorHttp};
use crate::panel::status::{self, derive_status, StatusSignals};
use crate::panel::traits::PanelClient;

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap());
static DAYS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s*days?").unwrap());
static NEW_USER_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"user_id(?:_multi)?=(\d+)").unwrap());
static ERROR_BOX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)class="error_messages?"[^>]*>(.*?)</"#).unwrap());
static GROUP_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"group_info\.php\?group_name=([^"&]+)"#).unwrap());
static LOGIN_FORM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<input[^>]+name=["']?password"#).unwrap());

const DEFAULT_GROUP: &str = "default";

/// Row labels read from user_info.php
const LABELS: &[&str] = &[
    "User ID",
    "Lock",
    "Group",
    "Credit",
    "Credit Used",
    "First Login",
    "Relative Expiration Date",
    "Absolute Expiration Date",
    "Comment",
    "Password",
];

/// Value cell that follows each label in the info table
static CELLS: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
    LABELS
        .iter()
        .map(|label| {
            let pattern = format!(
                r"(?is){}\s*:?\s*</td>\s*<td[^>]*>(.*?)</td>",
                regex::escape(label)
            );
            (*label, Regex::new(&pattern).unwrap())
        })
        .collect()
});

/// Fields scraped from user_info.php
#[derive(Debug, Clone, Default, PartialEq)]
struct UserInfo {
    user_id: String,
    locked: bool,
    credit_mb: f64,
    used_mb: f64,
    first_login: Option<i64>,
    relative_days: Option<i64>,
    absolute_expiry: Option<i64>,
    group: String,
    comment: String,
    password: Option<String>,
}

/// Text of the value cell that follows `label` in the info table
fn cell(html: &str, label: &str) -> Option<String> {
    let raw = CELLS.get(label)?.captures(html)?.get(1)?.as_str();
    let text = TAGS.replace_all(raw, " ");
    let text = text.replace("&nbsp;", " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() || text == "---" || text == "-" {
        None
    } else {
        Some(text)
    }
}

fn number(text: &str) -> Option<f64> {
    NUMBER
        .find(&text.replace(',', ""))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn parse_user_info(html: &str) -> Option<UserInfo> {
    let user_id = cell(html, "User ID")?;
    let user_id = user_id.split_whitespace().next()?.to_string();

    let locked = cell(html, "Lock")
        .map(|v| !v.eq_ignore_ascii_case("no"))
        .unwrap_or(false);

    Some(UserInfo {
        user_id,
        locked,
        credit_mb: cell(html, "Credit").as_deref().and_then(number).unwrap_or(0.0),
        used_mb: cell(html, "Credit Used").as_deref().and_then(number).unwrap_or(0.0),
        first_login: cell(html, "First Login").as_deref().and_then(parse_timestamp),
        relative_days: cell(html, "Relative Expiration Date").and_then(|v| {
            DAYS.captures(&v)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        }),
        absolute_expiry: cell(html, "Absolute Expiration Date")
            .as_deref()
            .and_then(parse_timestamp),
        group: cell(html, "Group").unwrap_or_default(),
        comment: cell(html, "Comment").unwrap_or_default(),
        password: cell(html, "Password"),
    })
}

fn page_error(html: &str) -> Option<String> {
    ERROR_BOX.captures(html).and_then(|c| {
        let text = TAGS.replace_all(c.get(1)?.as_str(), " ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    })
}

pub struct IbsngClient {
    panel: PanelConfig,
    http: VendorHttp,
    logged_in: RwLock<bool>,
}

impl IbsngClient {
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

    /// Fetch a page; landing on the login form means the session lapsed
    async fn page(&self, request: RequestBuilder) -> PanelResult<String> {
        self.ensure_session().await?;
        let response = self.http.send(request).await;
        let html = match response {
            Ok(response) => response.text().await.map_err(PanelError::from)?,
            Err(e) => {
                if e.is_auth() {
                    *self.logged_in.write().await = false;
                }
                return Err(e);
            }
        };
        if LOGIN_FORM.is_match(&html) {
            *self.logged_in.write().await = false;
            return Err(PanelError::AuthFailed("session expired".to_string()));
        }
        Ok(html)
    }

    async fn info(&self, username: &str) -> PanelResult<UserInfo> {
        let url = self.http.url("/IBSng/admin/user/user_info.php");
        let html = self
            .page(
                self.http
                    .client()
                    .get(url)
                    .query(&[("normal_username_multi", username)]),
            )
            .await?;
        parse_user_info(&html).ok_or_else(|| PanelError::NotFound(username.to_string()))
    }

    /// Submit one edit template of plugins/edit.php
    async fn edit(&self, user_id: &str, template: &str, attrs: &[(&str, String)]) -> PanelResult<()> {
        let mut form: Vec<(String, String)> = vec![
            ("target".into(), "user".into()),
            ("target_id".into(), user_id.to_string()),
            ("update".into(), "1".into()),
            ("edit_tpl_cs".into(), template.to_string()),
            ("attr_update_method_0".into(), template.to_string()),
        ];
        form.extend(attrs.iter().map(|(k, v)| (k.to_string(), v.clone())));

        let html = self
            .page(
                self.http
                    .client()
                    .post(self.http.url("/IBSng/admin/plugins/edit.php"))
                    .form(&form),
            )
            .await?;
        match page_error(&html) {
            Some(err) => Err(PanelError::VendorRejected(truncate(&err, 300))),
            None => Ok(()),
        }
    }

    fn to_account(&self, username: &str, info: UserInfo, now: i64) -> Account {
        let on_hold = info.first_login.is_none() && info.absolute_expiry.is_none();
        let expire_time = match (info.absolute_expiry, info.first_login, info.relative_days) {
            (Some(abs), _, _) => abs,
            (None, Some(first), Some(days)) => first + status::days_to_secs(days),
            _ => 0,
        };
        let data_limit = status::mb_to_bytes(info.credit_mb);
        let used = status::mb_to_bytes(info.used_mb);

        let signals = StatusSignals {
            reported: None,
            expire_time,
            data_limit,
            used_traffic: used,
            on_hold,
            enabled: !info.locked,
        };

        let mut account = Account::new(username, derive_status(&signals, now));
        account.data_limit = data_limit;
        account.used_traffic = used;
        account.expire_time = expire_time;
        account.note = info.comment;
        if !info.group.is_empty() {
            account.inbounds = vec![info.group];
        }
        account.credentials.insert("user_id".into(), info.user_id);
        if let Some(password) = info.password {
            account.credentials.insert("password".into(), password);
        }
        account
    }

    async fn set_locked(&self, username: &str, locked: bool) -> PanelResult<()> {
        let info = self.info(username).await?;
        if info.locked == locked {
            return Ok(());
        }
        if locked {
            self.edit(
                &info.user_id,
                "lock",
                &[("has_lock", "t".into()), ("attr__lock", "panel".into())],
            )
            .await
        } else {
            self.edit(&info.user_id, "lock", &[("to_del_attrs", "lock".into())])
                .await
        }
    }

    fn group_for(&self, spec: &AccountSpec) -> String {
        spec.inbounds
            .first()
            .or_else(|| self.panel.inbounds.first())
            .cloned()
            .unwrap_or_else(|| DEFAULT_GROUP.to_string())
    }
}

fn format_abs_date(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

#[async_trait]
impl PanelClient for IbsngClient {
    fn vendor(&self) -> VendorKind {
        VendorKind::Ibsng
    }

    fn panel_id(&self) -> &str {
        &self.panel.id
    }

    async fn authenticate(&self) -> PanelResult<()> {
        let (username, password) = match &self.panel.credentials {
            PanelCredentials::Password { username, password } => (username, password),
            PanelCredentials::Token { .. } => {
                return Err(PanelError::AuthFailed(
                    "IBSng requires username/password".to_string(),
                ))
            }
        };

        let response = self
            .http
            .send(
                self.http
                    .client()
                    .post(self.http.url("/IBSng/admin/"))
                    .form(&[("username", username.as_str()), ("password", password.as_str())]),
            )
            .await?;
        let html = response.text().await.map_err(PanelError::from)?;

        if LOGIN_FORM.is_match(&html) {
            *self.logged_in.write().await = false;
            let detail = page_error(&html).unwrap_or_else(|| "login rejected".to_string());
            return Err(PanelError::AuthFailed(detail));
        }
        *self.logged_in.write().await = true;
        tracing::debug!(panel = %self.panel.id, "IBSng session established");
        Ok(())
    }

    async fn get_account(&self, username: &str) -> PanelResult<Account> {
        let info = self.info(username).await?;
        Ok(self.to_account(username, info, status::now_secs()))
    }

    async fn create_account(&self, spec: &AccountSpec) -> PanelResult<Account> {
        let credit_mb = status::bytes_to_mb(spec.data_limit).round() as u64;
        let html = self
            .page(
                self.http
                    .client()
                    .post(self.http.url("/IBSng/admin/user/add_new_users.php"))
                    .form(&[
                        ("submit_form", "1".to_string()),
                        ("add", "1".to_string()),
                        ("count", "1".to_string()),
                        ("credit", credit_mb.to_string()),
                        ("owner_name", "system".to_string()),
                        ("group_name", self.group_for(spec)),
                        ("edit__normal_username", "normal_username".to_string()),
                    ]),
            )
            .await?;
        if let Some(err) = page_error(&html) {
            return Err(PanelError::VendorRejected(truncate(&err, 300)));
        }
        let user_id = NEW_USER_ID
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| PanelError::VendorRejected("no user id in response".to_string()))?;

        let password = credentials::random_sub_id(10);
        self.edit(
            &user_id,
            "normal_user_spec",
            &[
                ("attr__normal_username", spec.username.clone()),
                ("attr__normal_password", password.clone()),
            ],
        )
        .await?;

        if spec.expire_days > 0 {
            if spec.on_hold {
                self.edit(
                    &user_id,
                    "rel_exp_date",
                    &[
                        ("attr__rel_exp_date", spec.expire_days.to_string()),
                        ("attr__rel_exp_date_unit", "Days".to_string()),
                    ],
                )
                .await?;
            } else {
                let expire = status::expiry_from_days(status::now_secs(), spec.expire_days);
                self.edit(
                    &user_id,
                    "abs_exp_date",
                    &[
                        ("attr__abs_exp_date", format_abs_date(expire)),
                        ("attr__abs_exp_date_unit", "gregorian".to_string()),
                    ],
                )
                .await?;
            }
        }
        if !spec.note.is_empty() {
            self.edit(&user_id, "comment", &[("attr__comment", spec.note.clone())])
                .await?;
        }
        tracing::info!(panel = %self.panel.id, username = %spec.username, user_id = %user_id, "IBSng user created");

        let mut account = self.get_account(&spec.username).await?;
        account.credentials.insert("password".into(), password);
        Ok(account)
    }

    async fn modify_account(&self, username: &str, patch: &AccountPatch) -> PanelResult<Account> {
        let info = self.info(username).await?;

        if let Some(limit) = patch.data_limit {
            let mb = status::bytes_to_mb(limit).round() as u64;
            self.edit(&info.user_id, "credit", &[("attr__credit", mb.to_string())])
                .await?;
        }
        if let Some(expire) = patch.expire_time {
            if expire <= 0 {
                self.edit(
                    &info.user_id,
                    "abs_exp_date",
                    &[("to_del_attrs", "abs_exp_date,rel_exp_date".into())],
                )
                .await?;
            } else {
                self.edit(
                    &info.user_id,
                    "abs_exp_date",
                    &[
                        ("attr__abs_exp_date", format_abs_date(expire)),
                        ("attr__abs_exp_date_unit", "gregorian".to_string()),
                    ],
                )
                .await?;
            }
        }
        if let Some(note) = &patch.note {
            self.edit(&info.user_id, "comment", &[("attr__comment", note.clone())])
                .await?;
        }
        if let Some(group) = patch.inbounds.as_ref().and_then(|g| g.first()) {
            self.edit(&info.user_id, "group_name", &[("attr__group_name", group.clone())])
                .await?;
        }

        self.get_account(username).await
    }

    async fn delete_account(&self, username: &str) -> PanelResult<()> {
        let info = match self.info(username).await {
            Ok(info) => info,
            Err(PanelError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let html = self
            .page(
                self.http
                    .client()
                    .post(self.http.url("/IBSng/admin/user/del_user.php"))
                    .form(&[
                        ("user_id", info.user_id.as_str()),
                        ("delete", "1"),
                        ("delete_comment", ""),
                        ("delete_connection_logs", "on"),
                    ]),
            )
            .await?;
        match page_error(&html) {
            Some(err) => Err(PanelError::VendorRejected(truncate(&err, 300))),
            None => Ok(()),
        }
    }

    async fn enable_account(&self, username: &str) -> PanelResult<()> {
        self.set_locked(username, false).await
    }

    async fn disable_account(&self, username: &str) -> PanelResult<()> {
        self.set_locked(username, true).await
    }

    async fn reset_usage(&self, username: &str) -> PanelResult<()> {
        let info = self.info(username).await?;
        let mb = info.credit_mb.round() as u64;
        self.edit(
            &info.user_id,
            "credit",
            &[("attr__credit", mb.to_string()), ("attr__credit_used", "0".into())],
        )
        .await
    }

    async fn rotate_subscription_link(&self, _username: &str) -> PanelResult<String> {
        Err(PanelError::VendorRejected(
            "IBSng accounts have no subscription link".to_string(),
        ))
    }

    async fn list_inbound_options(&self) -> PanelResult<Vec<InboundOption>> {
        let html = self
            .page(
                self.http
                    .client()
                    .get(self.http.url("/IBSng/admin/group/group_list.php")),
            )
            .await?;
        let groups: BTreeSet<String> = GROUP_LINK
            .captures_iter(&html)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        Ok(groups
            .into_iter()
            .map(|g| InboundOption {
                id: g.clone(),
                protocol: "group".to_string(),
                label: g,
            })
            .collect())
    }

    async fn system_stats(&self) -> PanelResult<BTreeMap<String, Value>> {
        let html = self
            .page(
                self.http
                    .client()
                    .get(self.http.url("/IBSng/admin/report/online_users.php")),
            )
            .await?;
        let online: BTreeSet<&str> = NEW_USER_ID
            .captures_iter(&html)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        let mut stats = BTreeMap::new();
        stats.insert("online_users".to_string(), json!(online.len()));
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_PAGE: &str = r#"
<table>
<tr><td class="Form_Content_Row_Left">User ID:</td><td class="Form_Content_Row_Right">1042 <a href="x">edit</a></td></tr>
<tr><td class="Form_Content_Row_Left">Lock:</td><td class="Form_Content_Row_Right">No</td></tr>
<tr><td class="Form_Content_Row_Left">Group:</td><td class="Form_Content_Row_Right">gold</td></tr>
<tr><td class="Form_Content_Row_Left">Credit:</td><td class="Form_Content_Row_Right">10,240.00 MB</td></tr>
<tr><td class="Form_Content_Row_Left">Credit Used:</td><td class="Form_Content_Row_Right">512.5</td></tr>
<tr><td class="Form_Content_Row_Left">First Login:</td><td class="Form_Content_Row_Right">2024-01-01 10:00</td></tr>
<tr><td class="Form_Content_Row_Left">Relative Expiration Date:</td><td class="Form_Content_Row_Right">30 Days</td></tr>
<tr><td class="Form_Content_Row_Left">Absolute Expiration Date:</td><td class="Form_Content_Row_Right">---</td></tr>
<tr><td class="Form_Content_Row_Left">Comment:</td><td class="Form_Content_Row_Right">vip&nbsp;client</td></tr>
</table>"#;

    #[test]
    fn test_parse_user_info() {
        let info = parse_user_info(INFO_PAGE).unwrap();
        assert_eq!(info.user_id, "1042");
        assert!(!info.locked);
        assert_eq!(info.group, "gold");
        assert!((info.credit_mb - 10240.0).abs() < f64::EPSILON);
        assert!((info.used_mb - 512.5).abs() < f64::EPSILON);
        assert_eq!(info.relative_days, Some(30));
        assert_eq!(info.absolute_expiry, None);
        assert!(info.first_login.is_some());
        assert_eq!(info.comment, "vip client");
    }

    #[test]
    fn test_every_label_has_a_pattern() {
        assert_eq!(CELLS.len(), LABELS.len());
        assert_eq!(cell(INFO_PAGE, "Credit").as_deref(), Some("10,240.00 MB"));
        assert_eq!(cell(INFO_PAGE, "Unknown"), None);
    }

    #[test]
    fn test_missing_user_is_none() {
        assert!(parse_user_info("<html>User does not exist</html>").is_none());
    }

    #[test]
    fn test_page_error() {
        let html = r#"<div class="error_messages">Username already exists</div>"#;
        assert_eq!(page_error(html).as_deref(), Some("Username already exists"));
        assert_eq!(page_error("<div>ok</div>"), None);
    }
}

//! Shared fixtures: an in-memory panel, a recording notifier and an
//! `AppState` wired to an in-memory store.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use panelsync_lib::error::{AppError, AppResult};
use panelsync_lib::models::{
    Account, AccountPatch, AccountSpec, AccountStatus, AppConfig, InboundOption, PanelConfig,
    PanelCredentials, ServiceRecord, ServiceStatus, VendorKind,
};
use panelsync_lib::modules::notifier::Notifier;
use panelsync_lib::modules::store::{SqliteStore, Store};
use panelsync_lib::panel::status::{derive_status, StatusSignals};
use panelsync_lib::panel::{AdapterFactory, ClientRegistry, PanelClient, PanelError, PanelResult};
use panelsync_lib::AppState;

/// Vendor double holding raw telemetry; status is derived on every read
#[derive(Default)]
pub struct MemoryPanel {
    pub id: String,
    pub accounts: Mutex<HashMap<String, Account>>,
    pub enabled: Mutex<HashMap<String, bool>>,
    /// Every vendor call fails with a transport error while set
    pub down: Mutex<bool>,
    pub calls: Mutex<Vec<String>>,
}

impl MemoryPanel {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            ..Default::default()
        })
    }

    pub fn insert(&self, account: Account) {
        self.enabled
            .lock()
            .unwrap()
            .insert(account.username.clone(), account.status != AccountStatus::Disabled);
        self.accounts.lock().unwrap().insert(account.username.clone(), account);
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.as_str() == name).count()
    }

    fn enter(&self, name: &str) -> PanelResult<()> {
        self.calls.lock().unwrap().push(name.to_string());
        if *self.down.lock().unwrap() {
            Err(PanelError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn view(&self, username: &str) -> PanelResult<Account> {
        let mut account = self
            .accounts
            .lock()
            .unwrap()
            .get(username)
            .cloned()
            .ok_or_else(|| PanelError::NotFound(username.to_string()))?;
        let enabled = self.enabled.lock().unwrap().get(username).copied().unwrap_or(true);
        let signals = StatusSignals {
            reported: None,
            expire_time: account.expire_time,
            data_limit: account.data_limit,
            used_traffic: account.used_traffic,
            on_hold: account.status == AccountStatus::OnHold,
            enabled,
        };
        account.status = derive_status(&signals, chrono::Utc::now().timestamp());
        Ok(account)
    }

    fn set_enabled(&self, username: &str, enabled: bool) -> PanelResult<()> {
        self.view(username)?;
        self.enabled.lock().unwrap().insert(username.to_string(), enabled);
        Ok(())
    }
}

#[async_trait]
impl PanelClient for MemoryPanel {
    fn vendor(&self) -> VendorKind {
        VendorKind::Marzban
    }

    fn panel_id(&self) -> &str {
        &self.id
    }

    async fn authenticate(&self) -> PanelResult<()> {
        self.enter("authenticate")
    }

    async fn get_account(&self, username: &str) -> PanelResult<Account> {
        self.enter("get")?;
        self.view(username)
    }

    async fn create_account(&self, spec: &AccountSpec) -> PanelResult<Account> {
        self.enter("create")?;
        let status = if spec.on_hold {
            AccountStatus::OnHold
        } else {
            AccountStatus::Active
        };
        let mut account = Account::new(&spec.username, status);
        account.data_limit = spec.data_limit;
        if !spec.on_hold && spec.expire_days > 0 {
            account.expire_time = chrono::Utc::now().timestamp() + spec.expire_days as i64 * 86_400;
        }
        account.subscription_link = format!("https://sub.example.com/{}", spec.username);
        self.insert(account);
        self.view(&spec.username)
    }

    async fn modify_account(&self, username: &str, patch: &AccountPatch) -> PanelResult<Account> {
        self.enter("modify")?;
        {
            let mut accounts = self.accounts.lock().unwrap();
            let account = accounts
                .get_mut(username)
                .ok_or_else(|| PanelError::NotFound(username.to_string()))?;
            if let Some(limit) = patch.data_limit {
                account.data_limit = limit;
            }
            if let Some(expire) = patch.expire_time {
                account.expire_time = expire;
            }
        }
        self.view(username)
    }

    async fn delete_account(&self, username: &str) -> PanelResult<()> {
        self.enter("delete")?;
        self.accounts.lock().unwrap().remove(username);
        Ok(())
    }

    async fn enable_account(&self, username: &str) -> PanelResult<()> {
        self.enter("enable")?;
        self.set_enabled(username, true)
    }

    async fn disable_account(&self, username: &str) -> PanelResult<()> {
        self.enter("disable")?;
        self.set_enabled(username, false)
    }

    async fn reset_usage(&self, username: &str) -> PanelResult<()> {
        self.enter("reset")?;
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts
            .get_mut(username)
            .ok_or_else(|| PanelError::NotFound(username.to_string()))?;
        account.used_traffic = 0;
        Ok(())
    }

    async fn rotate_subscription_link(&self, username: &str) -> PanelResult<String> {
        self.enter("rotate")?;
        Ok(format!("https://sub.example.com/{}/new", username))
    }

    async fn list_inbound_options(&self) -> PanelResult<Vec<InboundOption>> {
        Ok(Vec::new())
    }

    async fn system_stats(&self) -> PanelResult<BTreeMap<String, serde_json::Value>> {
        Ok(BTreeMap::new())
    }
}

/// Hands out the registered in-memory panels by id
pub struct MemoryFactory {
    pub panels: HashMap<String, Arc<MemoryPanel>>,
}

impl AdapterFactory for MemoryFactory {
    fn build(&self, panel: &PanelConfig) -> Arc<dyn PanelClient> {
        match self.panels.get(&panel.id) {
            Some(p) => p.clone(),
            None => MemoryPanel::new(&panel.id),
        }
    }
}

/// Captures outbound messages; chats in `failing` reject delivery
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub deleted: Mutex<Vec<(i64, i64)>>,
    pub failing: Mutex<HashSet<i64>>,
}

impl RecordingNotifier {
    pub fn messages_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> AppResult<()> {
        if self.failing.lock().unwrap().contains(&chat_id) {
            return Err(AppError::Notify(format!("chat {} blocked the bot", chat_id)));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> AppResult<()> {
        self.deleted.lock().unwrap().push((chat_id, message_id));
        Ok(())
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<SqliteStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn panel_config(id: &str) -> PanelConfig {
    PanelConfig::new(
        id,
        VendorKind::Marzban,
        "http://127.0.0.1:9",
        PanelCredentials::Token { token: "t".into() },
    )
}

/// State over the given in-memory panels, each registered in the store
pub fn harness(panels: &[Arc<MemoryPanel>], config: AppConfig) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    for panel in panels {
        store.upsert_panel(&panel_config(&panel.id)).unwrap();
    }
    let factory = Arc::new(MemoryFactory {
        panels: panels.iter().map(|p| (p.id.clone(), p.clone())).collect(),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState {
        config,
        store: store.clone(),
        registry: Arc::new(ClientRegistry::with_factory(factory, Duration::from_secs(600))),
        notifier: notifier.clone(),
    };
    Harness {
        state,
        store,
        notifier,
    }
}

pub fn record(store: &SqliteStore, user_id: i64, panel_id: &str, username: &str, status: ServiceStatus) -> i64 {
    let mut record = ServiceRecord::new(user_id, panel_id, username);
    record.status = status;
    store.insert_service(&record).unwrap()
}

pub fn account(username: &str, data_limit: u64, used: u64, expire_time: i64) -> Account {
    let mut account = Account::new(username, AccountStatus::Active);
    account.data_limit = data_limit;
    account.used_traffic = used;
    account.expire_time = expire_time;
    account
}

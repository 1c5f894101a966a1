use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::config::{HttpConfig, TelegramConfig};
use crate::modules::i18n;
use crate::modules::store::Store;
use crate::utils::http::create_client;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Outbound message channel to users and admins
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> AppResult<()>;
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
struct BotResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot HTTP API
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, http: &HttpConfig) -> Self {
        let base = config
            .api_base
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        Self {
            client: create_client(http, false),
            endpoint: format!("{}/bot{}", base, config.bot_token),
        }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> AppResult<()> {
        let response = self
            .client
            .post(format!("{}/{}", self.endpoint, method))
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let parsed: BotResponse = response
            .json()
            .await
            .map_err(|e| AppError::Notify(format!("{} returned HTTP {}: {}", method, status, e)))?;
        if parsed.ok {
            Ok(())
        } else {
            Err(AppError::Notify(format!(
                "{}: {}",
                method,
                parsed.description.unwrap_or_else(|| status.to_string())
            )))
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> AppResult<()> {
        self.call(
            "sendMessage",
            json!({ "chat_id": chat_id, "text": text, "disable_web_page_preview": true }),
        )
        .await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> AppResult<()> {
        self.call(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
    }
}

/// Writes messages to the log; used when no bot token is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> AppResult<()> {
        tracing::info!(chat_id, text, "Notification (no bot configured)");
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> AppResult<()> {
        tracing::debug!(chat_id, message_id, "Delete message (no bot configured)");
        Ok(())
    }
}

/// Send `text` to every admin; returns how many deliveries succeeded.
/// A failed delivery to one admin does not stop the others.
pub async fn alert_admins(store: &dyn Store, notifier: &dyn Notifier, text: &str) -> usize {
    let admins = match store.admins() {
        Ok(admins) => admins,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load admins for alert");
            return 0;
        }
    };

    let mut delivered = 0;
    for chat_id in admins {
        match notifier.send(chat_id, text).await {
            Ok(()) => delivered += 1,
            Err(e) => tracing::warn!(chat_id, error = %e, "Admin alert failed"),
        }
    }
    delivered
}

/// Localize `key` for `user_id` and send it
pub async fn notify_user(
    store: &dyn Store,
    notifier: &dyn Notifier,
    default_language: &str,
    user_id: i64,
    key: &str,
    args: &[(&str, String)],
) -> AppResult<()> {
    let language = store
        .user_language(user_id)?
        .unwrap_or_else(|| default_language.to_string());
    let text = i18n::render(&language, key, args);
    notifier.send(user_id, &text).await
}

use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_language")]
    pub language: String,
    /// SQLite file, relative paths resolve against the data directory
    #[serde(default = "default_database_file")]
    pub database_file: String,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            language: default_language(),
            database_file: default_database_file(),
            telegram: TelegramConfig::default(),
            http: HttpConfig::default(),
            scheduler: SchedulerConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_language() -> String {
    "en".to_string()
}

fn default_database_file() -> String {
    "panelsync.db".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Chat that receives the daily report, 0 = admins
    #[serde(default)]
    pub report_chat_id: i64,
    /// Override for tests and self-hosted Bot API servers
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Upstream proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    pub enabled: bool,
    /// Proxy address (http://, https://, socks5://)
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-call vendor timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Cached panel sessions older than this are re-authenticated (seconds)
    #[serde(default = "default_session_max_age")]
    pub session_max_age: u64,
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            session_max_age: default_session_max_age(),
            upstream_proxy: UpstreamProxyConfig::default(),
        }
    }
}

fn default_request_timeout() -> u64 {
    20
}

fn default_session_max_age() -> u64 {
    1800
}

/// Intervals are seconds, thresholds are in the unit named by the field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sync_interval: u64,
    pub sync_sample_size: u32,
    pub max_sync_attempts: u32,
    pub notify_interval: u64,
    pub notify_cooldown: u64,
    pub notify_batch_size: u32,
    pub volume_threshold_gb: f64,
    pub days_threshold: i64,
    pub purge_interval: u64,
    pub purge_grace_days: i64,
    pub on_hold_interval: u64,
    pub on_hold_days: i64,
    pub health_interval: u64,
    pub health_timeout: u64,
    pub report_interval: u64,
    /// Local hour (0-23) after which the daily report is published
    pub report_hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: 60,
            sync_sample_size: 20,
            max_sync_attempts: 10,
            notify_interval: 300,
            notify_cooldown: 3600,
            notify_batch_size: 50,
            volume_threshold_gb: 1.0,
            days_threshold: 1,
            purge_interval: 3600,
            purge_grace_days: 3,
            on_hold_interval: 3600,
            on_hold_days: 3,
            health_interval: 300,
            health_timeout: 5,
            report_interval: 600,
            report_hour: 23,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub interval: u64,
    pub notify_batch_size: u32,
    pub gift_batch_size: u32,
    /// Directory scanned once at startup for legacy queue files
    pub legacy_dir: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            interval: 5,
            notify_batch_size: 20,
            gift_batch_size: 5,
            legacy_dir: "queue".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"language":"ru","scheduler":{"days_threshold":2}}"#).unwrap();
        assert_eq!(config.language, "ru");
        assert_eq!(config.scheduler.days_threshold, 2);
        assert_eq!(config.scheduler.sync_sample_size, 20);
        assert_eq!(config.http.request_timeout, 20);
        assert_eq!(config.queue.legacy_dir, "queue");
    }
}

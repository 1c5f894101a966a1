pub mod error;
pub mod models;
pub mod modules;
pub mod panel;
pub mod queue;
pub mod scheduler;
pub mod utils;

use std::sync::Arc;
use tracing::{error, info, warn};

use error::{AppError, AppResult};
use models::{AppConfig, PanelConfig};
use modules::notifier::{LogNotifier, Notifier, TelegramNotifier};
use modules::store::{SqliteStore, Store};
use modules::{config, logger, migration};
use panel::{ClientRegistry, PanelClient, PanelError};
use scheduler::Scheduler;

/// Shared handles passed to every job and to the fulfillment hook
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub registry: Arc<ClientRegistry>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        let registry = Arc::new(ClientRegistry::new(&config.http));
        Self {
            config,
            store,
            registry,
            notifier,
        }
    }

    /// Panel record plus an authenticated client for it
    pub async fn client(&self, panel_id: &str) -> AppResult<(PanelConfig, Arc<dyn PanelClient>)> {
        let panel = self
            .store
            .panel(panel_id)?
            .ok_or_else(|| AppError::Config(format!("unknown panel {}", panel_id)))?;
        let client = self.registry.get(&panel).await?;
        Ok((panel, client))
    }

    /// Record a vendor failure against the cache and lift it into `AppError`
    pub fn panel_failure(&self, panel_id: &str, e: PanelError) -> AppError {
        self.registry.note_failure(panel_id, &e);
        AppError::Panel(e)
    }
}

fn build_notifier(config: &AppConfig) -> Arc<dyn Notifier> {
    if config.telegram.bot_token.trim().is_empty() {
        warn!("No bot token configured, notifications go to the log");
        Arc::new(LogNotifier)
    } else {
        Arc::new(TelegramNotifier::new(&config.telegram, &config.http))
    }
}

pub async fn run() -> anyhow::Result<()> {
    let data_dir = config::get_data_dir()?;
    let log_dir = logger::get_log_dir(&data_dir)?;
    logger::init_logger(&log_dir);
    if std::env::args().skip(1).any(|arg| arg == "--clear-logs") {
        let cleared = logger::clear_logs(&log_dir)?;
        info!(cleared, "Log files truncated");
    }

    let config_file = config::config_path(&data_dir);
    let app_config = config::load_app_config(&config_file)?;
    if !config_file.exists() {
        config::save_app_config(&config_file, &app_config)?;
        info!(path = %config_file.display(), "Wrote default config");
    }

    let db_path = config::database_path(&data_dir, &app_config);
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db_path)?);
    info!(path = %db_path.display(), "Store opened");

    let legacy_dir = data_dir.join(&app_config.queue.legacy_dir);
    match migration::import_legacy_queue(store.as_ref(), &legacy_dir) {
        Ok(report) if report.imported + report.already_present > 0 => info!(
            imported = report.imported,
            already_present = report.already_present,
            skipped = report.skipped,
            "Legacy queue imported"
        ),
        Ok(_) => {}
        Err(e) => error!(error = %e, "Legacy queue import failed"),
    }

    let notifier = build_notifier(&app_config);
    let state = Arc::new(AppState::new(app_config, store, notifier));
    let handle = Scheduler::new(state).start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    handle.shutdown().await;
    Ok(())
}

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::AppResult;

pub fn get_log_dir(data_dir: &Path) -> AppResult<PathBuf> {
    let log_dir = data_dir.join("logs");

    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)?;
    }

    Ok(log_dir)
}

/// Truncate every log file in place so open appender handles stay valid.
/// Returns the number of files cleared.
pub fn clear_logs(log_dir: &Path) -> AppResult<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }
    let mut cleared = 0;
    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::OpenOptions::new().write(true).truncate(true).open(&path)?;
            cleared += 1;
        }
    }
    Ok(cleared)
}

/// Initialize logger system
pub fn init_logger(log_dir: &Path) {
    // Capture `log` macro records
    let _ = tracing_log::LogTracer::init();

    // Daily rolling file appender
    let file_appender = tracing_appender::rolling::daily(log_dir, "panelsync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::Layer::new()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    let file_layer = fmt::Layer::new()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_level(true);

    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init: a second initialization is a no-op
    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    // The writer must outlive the process
    std::mem::forget(guard);

    info!(log_dir = %log_dir.display(), "Logger initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_is_created_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = get_log_dir(dir.path()).unwrap();
        assert_eq!(log_dir, dir.path().join("logs"));
        assert!(log_dir.is_dir());
    }

    #[test]
    fn test_clear_logs_truncates_files() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = get_log_dir(dir.path()).unwrap();
        fs::write(log_dir.join("panelsync.log.2026-01-01"), "old lines\n").unwrap();
        fs::write(log_dir.join("panelsync.log.2026-01-02"), "more\n").unwrap();
        fs::create_dir(log_dir.join("archive")).unwrap();

        assert_eq!(clear_logs(&log_dir).unwrap(), 2);
        let size = fs::metadata(log_dir.join("panelsync.log.2026-01-01")).unwrap().len();
        assert_eq!(size, 0);
        assert_eq!(clear_logs(&dir.path().join("missing")).unwrap(), 0);
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::models::AppConfig;

const DATA_DIR: &str = ".panelsync";
const DATA_DIR_ENV: &str = "PANELSYNC_DATA_DIR";
const CONFIG_FILE: &str = "config.json";

/// Get data directory path, creating it on first use
pub fn get_data_dir() -> AppResult<PathBuf> {
    let data_dir = match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .ok_or_else(|| AppError::Config("Failed to get user home directory".to_string()))?
            .join(DATA_DIR),
    };

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Load application config; a missing file yields defaults
pub fn load_app_config(path: &Path) -> AppResult<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::new());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| AppError::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Save application config
pub fn save_app_config(path: &Path, config: &AppConfig) -> AppResult<()> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

/// Resolve the database file against the data directory
pub fn database_path(data_dir: &Path, config: &AppConfig) -> PathBuf {
    let file = Path::new(&config.database_file);
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        data_dir.join(file)
    }
}

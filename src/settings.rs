// src/settings.rs
//
// Application settings, persisted as TOML in the user config directory.
// Every field has a serde default so older or hand-written partial files
// keep loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::serial::LinkConfig;
use crate::store::PostgresConfig;

const APP_DIR_NAME: &str = "echoplant";
const SETTINGS_FILE_NAME: &str = "settings.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default)]
    pub postgres: PostgresConfig,
    /// Read the postgres password from the system keyring instead of this file
    #[serde(default)]
    pub postgres_password_from_keyring: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    #[default]
    Keyring,
    Passphrase,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoSettings {
    #[serde(default)]
    pub key_source: KeySource,
    /// Used when `key_source = "passphrase"`
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_true")]
    pub file_logging: bool,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub serial: LinkConfig,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub crypto: CryptoSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_sqlite_path() -> String {
    data_dir().join("echoplant.db").to_string_lossy().to_string()
}
fn default_reports_dir() -> String {
    data_dir().join("Reports").to_string_lossy().to_string()
}
fn default_true() -> bool {
    true
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            sqlite_path: default_sqlite_path(),
            postgres: PostgresConfig::default(),
            postgres_password_from_keyring: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file_logging: default_true(),
            reports_dir: default_reports_dir(),
        }
    }
}

/// Default location: `<config dir>/echoplant/settings.toml`
pub fn settings_path() -> Result<PathBuf, String> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| "Failed to get config dir".to_string())?;
    Ok(config_dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load settings from `path`. A missing file yields the defaults.
pub fn load_settings_from(path: &Path) -> Result<AppSettings, String> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read settings: {}", e))?;
    toml::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config dir: {}", e))?;
    }
    let content = toml::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))
}

pub fn load_settings() -> Result<AppSettings, String> {
    load_settings_from(&settings_path()?)
}

pub fn save_settings(settings: &AppSettings) -> Result<(), String> {
    save_settings_to(&settings_path()?, settings)
}

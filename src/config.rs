//! Configuration file parser for ~/.config/feedhaul/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
//!
//! Translation keys only seed the settings table: once a setting exists, the
//! stored value wins and the file is not consulted again.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::storage::Database;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Debug output masks `deepl_api_key` and `freshrss_password`.
///
/// Relative paths are resolved against the config directory.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file. Defaults to `feedhaul.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Root for script-backed subscriptions. Defaults to `scripts/` in the
    /// config directory.
    pub scripts_dir: Option<PathBuf>,

    /// Minutes between batches in daemon mode.
    pub refresh_interval_minutes: u64,

    pub translation_enabled: bool,

    pub target_language: String,

    /// `google` or `deepl`.
    pub translation_provider: String,

    pub deepl_api_key: Option<String>,

    /// FreshRSS server for `sync`, e.g. `https://rss.example.com`.
    pub freshrss_url: Option<String>,

    pub freshrss_username: Option<String>,

    /// FreshRSS API password (not the web login password).
    pub freshrss_password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            scripts_dir: None,
            refresh_interval_minutes: 10,
            translation_enabled: false,
            target_language: "en".to_string(),
            translation_provider: "google".to_string(),
            deepl_api_key: None,
            freshrss_url: None,
            freshrss_username: None,
            freshrss_password: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("scripts_dir", &self.scripts_dir)
            .field("refresh_interval_minutes", &self.refresh_interval_minutes)
            .field("translation_enabled", &self.translation_enabled)
            .field("target_language", &self.target_language)
            .field("translation_provider", &self.translation_provider)
            .field(
                "deepl_api_key",
                &self.deepl_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("freshrss_url", &self.freshrss_url)
            .field("freshrss_username", &self.freshrss_username)
            .field(
                "freshrss_password",
                &self.freshrss_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "database_path",
        "scripts_dir",
        "refresh_interval_minutes",
        "translation_enabled",
        "target_language",
        "translation_provider",
        "deepl_api_key",
        "freshrss_url",
        "freshrss_username",
        "freshrss_password",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            refresh_interval_minutes = config.refresh_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        match &self.database_path {
            Some(path) => config_dir.join(path),
            None => config_dir.join("feedhaul.db"),
        }
    }

    /// `Path::join` keeps absolute values as they are.
    pub fn scripts_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.scripts_dir {
            Some(path) => config_dir.join(path),
            None => config_dir.join("scripts"),
        }
    }

    /// FreshRSS credentials, when all three keys are set and non-blank.
    pub fn freshrss(&self) -> Option<(&str, &str, &str)> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.trim().is_empty())
        }
        Some((
            present(&self.freshrss_url)?,
            present(&self.freshrss_username)?,
            present(&self.freshrss_password)?,
        ))
    }

    /// Write translation settings that are not yet present in the store.
    ///
    /// Returns how many settings were created.
    pub async fn seed_settings(&self, db: &Database) -> anyhow::Result<usize> {
        let mut seeded = Vec::new();
        seeded.push((
            "translation_enabled",
            if self.translation_enabled { "true" } else { "false" }.to_string(),
        ));
        seeded.push(("target_language", self.target_language.clone()));
        seeded.push(("translation_provider", self.translation_provider.clone()));
        if let Some(key) = self.deepl_api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            seeded.push(("deepl_api_key", key.to_string()));
        }

        let mut created = 0;
        for (key, value) in seeded {
            if db.seed_setting(key, &value).await? {
                tracing::debug!(key = key, "Seeded setting from config file");
                created += 1;
            }
        }
        Ok(created)
    }
}

// ============================================================================
// Tests
// ============================================================================

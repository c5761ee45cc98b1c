//! Configuration constants and persisted sync settings
//!
//! Central location for retry limits, timeouts, and validation boundaries,
//! plus the JSON-backed `SyncSettings` loaded from the data directory.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

// ===== Sync Queue =====

/// A slot whose retry counter exceeds this value is dropped.
pub const MAX_SYNC_RETRIES: i64 = 5;

/// Default number of queue slots replayed per drain cycle
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Upper bound for a configured batch size
pub const MAX_BATCH_SIZE: u32 = 500;

// ===== Remote API =====

/// Default per-request timeout for a replay attempt
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Minimum request timeout (anything lower times out on slow field links)
pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;

/// Maximum request timeout (5 minutes)
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Path prefix for record endpoints
pub const API_PREFIX: &str = "/api";

/// Health endpoint used by the reachability probe
pub const HEALTH_ENDPOINT: &str = "/api/health";

// ===== Connectivity =====

/// Time the network must stay reachable before "online" is declared
pub const DEFAULT_DEBOUNCE_MS: u64 = 1_500;

/// Minimum debounce window in milliseconds
pub const MIN_DEBOUNCE_MS: u64 = 100;

/// Maximum debounce window in milliseconds
pub const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Default interval between reachability probes
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;

// ===== Encryption =====

/// Keyring service name for the record encryption key
pub const KEYSTORE_SERVICE: &str = "fieldsync";

/// Keyring entry holding the base64-encoded record encryption key
pub const ENCRYPTION_KEY_ID: &str = "record-encryption-key";

/// Substituted for fields that can no longer be decrypted
pub const UNAVAILABLE_PLACEHOLDER: &str = "[content unavailable]";

// ===== Files =====

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "fieldsync.db";

/// Settings file name inside the data directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Remote sync settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    /// Base URL of the remote API, e.g. `https://field.example.org`
    #[serde(default)]
    pub api_base_url: String,
    /// Bearer token sent with every replay
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// 0 disables the background probe
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_probe_interval_secs() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            auth_token: None,
            batch_size: default_batch_size(),
            request_timeout_secs: default_request_timeout_secs(),
            debounce_ms: default_debounce_ms(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl SyncSettings {
    /// Check every field against its allowed range
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(AppError::Config(format!(
                "batch_size must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }

        if !(MIN_REQUEST_TIMEOUT_SECS..=MAX_REQUEST_TIMEOUT_SECS)
            .contains(&self.request_timeout_secs)
        {
            return Err(AppError::Config(format!(
                "request_timeout_secs must be between {} and {}",
                MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS
            )));
        }

        if !(MIN_DEBOUNCE_MS..=MAX_DEBOUNCE_MS).contains(&self.debounce_ms) {
            return Err(AppError::Config(format!(
                "debounce_ms must be between {} and {}",
                MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS
            )));
        }

        let url = self.api_base_url.trim();
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::Config(
                "api_base_url must include http:// or https://".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_secs > 0).then(|| Duration::from_secs(self.probe_interval_secs))
    }
}

/// Loads and saves `SyncSettings` as JSON inside the data directory
pub struct SettingsStore {
    settings_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            settings_path: data_dir.join(SETTINGS_FILE),
        }
    }

    /// Load settings from disk or create the default file if missing
    pub async fn load(&self) -> Result<SyncSettings> {
        if !self.settings_path.exists() {
            tracing::info!("Settings file not found, creating default settings");
            let default = SyncSettings::default();
            self.save(&default).await?;
            return Ok(default);
        }

        let content = fs::read_to_string(&self.settings_path).await?;
        let settings: SyncSettings = serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse settings: {}", e)))?;
        settings.validate()?;

        Ok(settings)
    }

    /// Save settings to disk
    pub async fn save(&self, settings: &SyncSettings) -> Result<()> {
        settings.validate()?;

        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_path, content).await?;
        tracing::info!("Settings saved to {:?}", self.settings_path);

        Ok(())
    }
}

//! # Engine Configuration
//!
//! Configuration management for the provisioning and reconciliation engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     LEDGER_BASE_URL=https://backend.example.net                        │
//! │     LEDGER_API_TOKEN=...                                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/ledger/engine.toml (Linux)                               │
//! │     ~/Library/Application Support/com.ledger.engine/engine.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [remote]
//! base_url = "https://backend.example.net"
//! timeout_secs = 60
//! bulk_timeout_secs = 300
//! verify_tls = true
//! api_token = "..."
//!
//! [scope]
//! isp_id = 3
//! branch_id = 7
//! user_id = 12
//! username = "ops"
//!
//! [sync]
//! list_page_size = 50
//! detail_checkpoint_every = 25
//! display_timezone = "Asia/Kolkata"
//!
//! [jobs]
//! poll_interval_secs = 5
//! max_attempts = 3
//! ```

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Remote Settings
// =============================================================================

/// Connection settings for the remote backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Backend root. Normalized to end in `/api`.
    #[serde(default)]
    pub base_url: String,

    /// Timeout for interactive calls (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout for calls made by bulk jobs (seconds).
    #[serde(default = "default_bulk_timeout")]
    pub bulk_timeout_secs: u64,

    /// Verify the backend's TLS certificate.
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Bearer token. Never logged.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Log every request and response body (secrets redacted).
    #[serde(default)]
    pub debug_log_requests: bool,
}

fn default_timeout() -> u64 {
    60
}

fn default_bulk_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: String::new(),
            timeout_secs: default_timeout(),
            bulk_timeout_secs: default_bulk_timeout(),
            verify_tls: true,
            api_token: None,
            debug_log_requests: false,
        }
    }
}

impl std::fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("bulk_timeout_secs", &self.bulk_timeout_secs)
            .field("verify_tls", &self.verify_tls)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("debug_log_requests", &self.debug_log_requests)
            .finish()
    }
}

impl RemoteSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn bulk_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_timeout_secs)
    }
}

/// Strips a trailing `/` and appends `/api` when missing.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.ends_with("/api") {
        trimmed.to_string()
    } else {
        format!("{}/api", trimmed)
    }
}

// =============================================================================
// Scope Settings
// =============================================================================

/// Default scoping sent with every request (ISP / branch / user context).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeSettings {
    #[serde(default)]
    pub isp_id: Option<i64>,

    #[serde(default)]
    pub branch_id: Option<i64>,

    /// Backend user the engine acts as.
    #[serde(default)]
    pub user_id: Option<i64>,

    #[serde(default)]
    pub username: Option<String>,
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Reconciliation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Rows requested per list page.
    #[serde(default = "default_page_size")]
    pub list_page_size: usize,

    /// Bulk detail runs write a checkpoint every N records.
    #[serde(default = "default_checkpoint_every")]
    pub detail_checkpoint_every: usize,

    /// IANA zone the backend uses to display expirations.
    #[serde(default = "default_timezone")]
    pub display_timezone: String,

    /// Correlation rows older than this are still used, but logged.
    #[serde(default = "default_staleness")]
    pub correlation_max_staleness_hours: i64,
}

fn default_page_size() -> usize {
    50
}

fn default_checkpoint_every() -> usize {
    25
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_staleness() -> i64 {
    24
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            list_page_size: default_page_size(),
            detail_checkpoint_every: default_checkpoint_every(),
            display_timezone: default_timezone(),
            correlation_max_staleness_hours: default_staleness(),
        }
    }
}

impl SyncSettings {
    /// Parses the display timezone.
    pub fn timezone(&self) -> SyncResult<Tz> {
        self.display_timezone.parse::<Tz>().map_err(|_| {
            SyncError::Config(format!(
                "Unknown display timezone: '{}'",
                self.display_timezone
            ))
        })
    }
}

// =============================================================================
// Job Settings
// =============================================================================

/// Background job worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Interval between queue polls (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_bulk_details_timeout")]
    pub bulk_details_timeout_secs: u64,

    #[serde(default = "default_single_details_timeout")]
    pub single_details_timeout_secs: u64,

    #[serde(default = "default_list_timeout")]
    pub list_timeout_secs: u64,

    /// Attempts before a job is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_bulk_details_timeout() -> u64 {
    7200
}
fn default_single_details_timeout() -> u64 {
    600
}
fn default_list_timeout() -> u64 {
    1800
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for JobSettings {
    fn default() -> Self {
        JobSettings {
            poll_interval_secs: default_poll_interval(),
            bulk_details_timeout_secs: default_bulk_details_timeout(),
            single_details_timeout_secs: default_single_details_timeout(),
            list_timeout_secs: default_list_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Ledger file. Defaults to `ledger.db` in the project data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub scope: ScopeSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub jobs: JobSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.remote.base_url.is_empty() {
            let url = url::Url::parse(&self.remote.base_url)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "Base URL must start with http:// or https://, got: {}",
                    self.remote.base_url
                )));
            }
        }

        if self.remote.timeout_secs == 0 || self.remote.bulk_timeout_secs == 0 {
            return Err(SyncError::Config(
                "remote timeouts must be greater than 0".into(),
            ));
        }

        if self.sync.list_page_size == 0 {
            return Err(SyncError::Config(
                "list_page_size must be greater than 0".into(),
            ));
        }

        if self.sync.detail_checkpoint_every == 0 {
            return Err(SyncError::Config(
                "detail_checkpoint_every must be greater than 0".into(),
            ));
        }

        if self.jobs.max_attempts == 0 {
            return Err(SyncError::Config("max_attempts must be at least 1".into()));
        }

        self.sync.timezone()?;
        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LEDGER_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.remote.base_url = url;
        }

        if let Ok(token) = std::env::var("LEDGER_API_TOKEN") {
            debug!("Overriding API token from environment");
            self.remote.api_token = Some(token);
        }

        if let Ok(secs) = std::env::var("LEDGER_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.remote.timeout_secs = s;
            }
        }

        if let Ok(secs) = std::env::var("LEDGER_BULK_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.remote.bulk_timeout_secs = s;
            }
        }

        if let Ok(verify) = std::env::var("LEDGER_VERIFY_TLS") {
            match parse_bool(&verify) {
                Some(v) => self.remote.verify_tls = v,
                None => warn!(value = %verify, "Unknown LEDGER_VERIFY_TLS value in environment"),
            }
        }

        if let Ok(debug_requests) = std::env::var("LEDGER_DEBUG_REQUESTS") {
            if let Some(v) = parse_bool(&debug_requests) {
                self.remote.debug_log_requests = v;
            }
        }

        if let Ok(id) = std::env::var("LEDGER_ISP_ID") {
            if let Ok(i) = id.parse::<i64>() {
                debug!(isp_id = i, "Overriding ISP scope from environment");
                self.scope.isp_id = Some(i);
            }
        }

        if let Ok(id) = std::env::var("LEDGER_BRANCH_ID") {
            if let Ok(i) = id.parse::<i64>() {
                self.scope.branch_id = Some(i);
            }
        }

        if let Ok(id) = std::env::var("LEDGER_USER_ID") {
            if let Ok(i) = id.parse::<i64>() {
                self.scope.user_id = Some(i);
            }
        }

        if let Ok(username) = std::env::var("LEDGER_USERNAME") {
            self.scope.username = Some(username);
        }

        if let Ok(path) = std::env::var("LEDGER_DATABASE") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(tz) = std::env::var("LEDGER_TIMEZONE") {
            self.sync.display_timezone = tz;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ledger", "engine")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    /// Returns the ledger file path (configured or project data directory).
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "ledger", "engine")
                .map(|dirs| dirs.data_dir().join("ledger.db"))
        })
    }

    /// Normalized base URL.
    pub fn api_base(&self) -> String {
        normalize_base_url(&self.remote.base_url)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

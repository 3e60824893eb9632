//! Autopost configuration system.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AutopostError, Result};

/// Root configuration (`~/.autopost/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopostConfig {
    /// Path to the task database.
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_store_path() -> String {
    "~/.autopost/tasks.db".into()
}

impl Default for AutopostConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            engine: EngineConfig::default(),
            telegram: TelegramConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl AutopostConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AutopostError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AutopostError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AutopostError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Autopost home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autopost")
    }
}

/// Dispatch engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker tasks draining the dispatch queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Max simultaneous sends across ALL tasks. Independent of worker count;
    /// this is what keeps the bot under the API's abuse protection.
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    /// Interval floor — post-jitter intervals never go below this.
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    /// Interval ceiling applied when tasks are created or edited.
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
    /// Pause between queue insertions at startup, so a restart does not fire
    /// every task in the same instant.
    #[serde(default = "default_startup_stagger")]
    pub startup_stagger_ms: u64,
    /// Health monitor sweep period.
    #[serde(default = "default_health_check")]
    pub health_check_secs: u64,
    /// A task is presumed stalled after `stall_factor × interval` without
    /// activity.
    #[serde(default = "default_stall_factor")]
    pub stall_factor: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_workers() -> usize {
    4
}
fn default_max_concurrent_sends() -> usize {
    5
}
fn default_min_interval() -> u64 {
    20
}
fn default_max_interval() -> u64 {
    1800
}
fn default_startup_stagger() -> u64 {
    1000
}
fn default_health_check() -> u64 {
    3600
}
fn default_stall_factor() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_concurrent_sends: default_max_concurrent_sends(),
            min_interval_secs: default_min_interval(),
            max_interval_secs: default_max_interval(),
            startup_stagger_ms: default_startup_stagger(),
            health_check_secs: default_health_check(),
            stall_factor: default_stall_factor(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Clamp an operator-supplied interval into the allowed band.
    pub fn clamp_interval(&self, secs: u64) -> u64 {
        secs.clamp(self.min_interval_secs, self.max_interval_secs)
    }
}

/// Retry/backoff policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// In-place retries for transient failures before the cycle is recorded
    /// as failed and rescheduled normally.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    /// Fixed delay before each transient retry.
    #[serde(default = "default_transient_delay")]
    pub transient_delay_secs: u64,
    /// Upper bound honored for API-demanded flood waits.
    #[serde(default = "default_flood_wait_cap")]
    pub flood_wait_cap_secs: u64,
    /// Upper bound honored for slow-mode waits.
    #[serde(default = "default_slowmode_wait_cap")]
    pub slowmode_wait_cap_secs: u64,
    /// Attempts for a failed store write before giving up on it.
    #[serde(default = "default_store_write_retries")]
    pub store_write_retries: u32,
    /// Initial backoff between store write attempts (doubles each try).
    #[serde(default = "default_store_retry_delay")]
    pub store_retry_delay_ms: u64,
}

fn default_transient_retries() -> u32 {
    3
}
fn default_transient_delay() -> u64 {
    30
}
fn default_flood_wait_cap() -> u64 {
    900
}
fn default_slowmode_wait_cap() -> u64 {
    60
}
fn default_store_write_retries() -> u32 {
    5
}
fn default_store_retry_delay() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient_retries: default_transient_retries(),
            transient_delay_secs: default_transient_delay(),
            flood_wait_cap_secs: default_flood_wait_cap(),
            slowmode_wait_cap_secs: default_slowmode_wait_cap(),
            store_write_retries: default_store_write_retries(),
            store_retry_delay_ms: default_store_retry_delay(),
        }
    }
}

/// Telegram Bot API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn bool_true() -> bool {
    true
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            enabled: true,
        }
    }
}

/// Owner notifications on task outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Chat that receives outcome notifications (usually the owner's DM).
    #[serde(default)]
    pub chat_id: Option<i64>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chat_id: None,
        }
    }
}

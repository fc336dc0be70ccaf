//! Configuration management for the capture agent.
//!
//! Loads configuration from TOML files and provides runtime defaults. The
//! onboarding identity record is a separate read-only JSON file owned by the
//! desktop shell; the pipeline only ever reads it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture tick period in milliseconds
    #[serde(default = "default_capture_interval_ms")]
    pub interval_ms: u64,

    /// Resolution ceiling; larger captures are downscaled to fit
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    #[serde(default = "default_max_height")]
    pub max_height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_capture_interval_ms(),
            max_width: default_max_width(),
            max_height: default_max_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Collector endpoint; uploads are skipped until this is set
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Value of the Authorization header
    #[serde(default)]
    pub auth_token: String,

    /// Delete the local artifact after a confirmed 2xx delivery
    #[serde(default = "default_true")]
    pub delete_after_upload: bool,

    /// Hard timeout for one delivery attempt, seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Hard timeout for the health probe, seconds
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            auth_token: String::new(),
            delete_after_upload: true,
            request_timeout_secs: default_request_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry queue scan period in milliseconds
    #[serde(default = "default_retry_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Recoverable-failure retries before a task is abandoned
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_retry_scan_interval_ms(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Override of the per-user artifact directory
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Age threshold for the purge maintenance operation, hours
    #[serde(default)]
    pub max_age_hours: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Override of the onboarding record path
    #[serde(default)]
    pub record_path: Option<PathBuf>,
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_capture_interval_ms() -> u64 {
    60_000
}

fn default_max_width() -> u32 {
    1920
}

fn default_max_height() -> u32 {
    1080
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_health_timeout_secs() -> u64 {
    5
}

fn default_retry_scan_interval_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("capture-agent")
            .join("config.toml")
    }

    /// Save configuration to the default path
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to_path(Self::default_config_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Path of the onboarding identity record.
    pub fn identity_record_path(&self) -> PathBuf {
        self.identity
            .record_path
            .clone()
            .unwrap_or_else(IdentityRecord::default_path)
    }
}

/// Identity fields attached to every upload, persisted by the onboarding
/// flow. The pipeline reads this record at enqueue time and never writes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(default)]
    pub account_email: String,

    #[serde(default)]
    pub subject_name: String,
}

impl IdentityRecord {
    /// Default record location, alongside the agent configuration
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("capture-agent")
            .join("identity.json")
    }

    /// Read the record, tolerating absence. A missing or unreadable record
    /// yields empty identity fields; the collector decides whether to accept
    /// anonymous payloads.
    pub fn load_from_path(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Failed to parse identity record {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                debug!("No identity record at {:?}", path);
                Self::default()
            }
        }
    }
}

//! Configuration for the session guardian.

use crate::collector::SignalKind;
use crate::core::MonitorConfig;
use crate::reporter::ReporterConfig;
use crate::storage::DEFAULT_PREFIX;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    /// POST target for security incidents
    pub audit_endpoint: Option<String>,

    /// Minutes without activity before the session is idle
    pub idle_timeout_minutes: u32,

    /// Signal kinds that count as user activity
    pub activity_events: Vec<SignalKind>,

    /// Minimum spacing between accepted activity signals
    pub activity_throttle_ms: u64,

    /// Enables diagnostic logging only
    pub debug: bool,

    /// Extra headers sent with every incident
    pub headers: BTreeMap<String, String>,

    /// Retry failed deliveries with exponential backoff
    pub retry: bool,

    pub max_retries: u32,

    /// Namespace prefix for encrypted storage keys
    pub storage_prefix: String,

    /// Reported as the incident `url` when set
    pub source_url: Option<String>,

    /// Path for the encrypted store and session statistics
    pub data_path: PathBuf,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("session-guardian");

        Self {
            audit_endpoint: None,
            idle_timeout_minutes: 15,
            activity_events: SignalKind::DEFAULT_ACTIVITY.to_vec(),
            activity_throttle_ms: 1000,
            debug: false,
            headers: BTreeMap::new(),
            retry: true,
            max_retries: 3,
            storage_prefix: DEFAULT_PREFIX.to_string(),
            source_url: None,
            data_path: data_dir,
        }
    }
}

impl GuardianConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: GuardianConfig = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("session-guardian")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Reject values the monitor or reporter cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_minutes == 0 {
            return Err(ConfigError::Invalid(
                "idle_timeout_minutes must be at least 1".to_string(),
            ));
        }
        if let Some(endpoint) = &self.audit_endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "audit_endpoint must be an http(s) URL, got '{endpoint}'"
                )));
            }
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.idle_timeout_minutes) * 60)
    }

    pub fn activity_throttle(&self) -> Duration {
        Duration::from_millis(self.activity_throttle_ms)
    }

    /// Settings for the idle monitor.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            idle_timeout_minutes: self.idle_timeout_minutes,
            activity_events: self.activity_events.clone(),
            activity_throttle: self.activity_throttle(),
        }
    }

    /// Settings for the incident reporter. Requires `audit_endpoint`.
    pub fn reporter_config(&self) -> Result<ReporterConfig, ConfigError> {
        let endpoint = self
            .audit_endpoint
            .clone()
            .ok_or_else(|| ConfigError::MissingField("audit_endpoint".to_string()))?;

        Ok(ReporterConfig {
            endpoint,
            headers: self.headers.clone(),
            retry: self.retry,
            max_retries: self.max_retries,
            source_url: self.source_url.clone(),
        })
    }

    /// Path of the encrypted session store.
    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("store.json")
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    MissingField(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::MissingField(field) => write!(f, "Missing required setting: {field}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

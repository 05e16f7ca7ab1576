//! Configuration management for Lantern.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::detection::DetectionConfig;
use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration.
///
/// This is loaded from `~/.config/lantern/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scan orchestration settings
    pub scanning: ScanningConfig,
    /// Detection service settings
    pub detector: DetectorConfig,
    /// Event and checkpoint storage settings
    pub database: DatabaseConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the default path, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults if not found.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides and validate it.
    ///
    /// Supports the following environment variables:
    /// - `LANTERN_MAX_CONCURRENT_SPACES`: Override the space fan-out bound
    /// - `LANTERN_DETECTOR_URL`: Override the detection service endpoint
    /// - `LANTERN_DATABASE_PATH`: Override the database file location
    pub fn load_with_env(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("LANTERN_MAX_CONCURRENT_SPACES") {
            if let Ok(max) = val.parse() {
                self.scanning.max_concurrent_spaces = max;
                tracing::debug!("Override scanning.max_concurrent_spaces from env: {}", max);
            }
        }

        if let Some(url) = lookup("LANTERN_DETECTOR_URL") {
            tracing::debug!("Override detector.endpoint from env: {}", url);
            self.detector.endpoint = url;
        }

        if let Some(path) = lookup("LANTERN_DATABASE_PATH") {
            tracing::debug!("Override database.path from env: {}", path);
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Check cross-field invariants.
    ///
    /// The detector deadline must stay below the transport deadline so that
    /// application-level timeouts surface before raw transport errors.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scanning.max_concurrent_spaces == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scanning.max_concurrent_spaces".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scanning.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scanning.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scanning.detector_timeout_ms >= self.detector.transport_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "scanning.detector_timeout_ms".to_string(),
                reason: format!(
                    "{}ms must be below detector.transport_timeout_ms ({}ms)",
                    self.scanning.detector_timeout_ms, self.detector.transport_timeout_ms
                ),
            });
        }
        self.detector.detection.validate()
    }

    /// Save configuration to the default path.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/lantern/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "lantern", "lantern").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/lantern`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "lantern", "lantern").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Resolve the database file, defaulting to `<data_dir>/lantern.db`.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("lantern.db")),
        }
    }
}

/// Scan orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Number of spaces scanned concurrently in a multi-space request
    pub max_concurrent_spaces: usize,
    /// Deadline for a single detector call in milliseconds
    pub detector_timeout_ms: u64,
    /// Deadline for a single content-source call in milliseconds
    pub content_timeout_ms: u64,
    /// Attempts per item before giving up
    pub max_attempts: u32,
    /// Failed attempts retried without emitting an ERROR event
    pub quiet_attempts: u32,
    /// First retry delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound on the retry delay in milliseconds
    pub max_backoff_ms: u64,
    /// Age after which a RUNNING checkpoint is considered abandoned
    pub lease_timeout_secs: u64,
    /// Age after which a completed space should be scanned again
    pub staleness_days: u32,
    /// Events buffered per live subscriber
    pub subscriber_buffer: usize,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            max_concurrent_spaces: 3,
            detector_timeout_ms: 8_000,
            content_timeout_ms: 15_000,
            max_attempts: 3,
            quiet_attempts: 1,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            lease_timeout_secs: 300,
            staleness_days: 7,
            subscriber_buffer: 256,
        }
    }
}

/// Detection service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Base URL of the detection service
    pub endpoint: String,
    /// Transport-level deadline of the HTTP client in milliseconds
    pub transport_timeout_ms: u64,
    /// Per-type enablement and thresholds
    pub detection: DetectionConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8085".to_string(),
            transport_timeout_ms: 10_000,
            detection: DetectionConfig::default(),
        }
    }
}

/// Event and checkpoint storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file; defaults to the XDG data directory
    pub path: Option<PathBuf>,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,lantern=debug".to_string(),
        }
    }
}

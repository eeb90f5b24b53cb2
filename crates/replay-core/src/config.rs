//! Configuration system for CPEE Replay
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, working directory, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "CPEE_REPLAY_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "cpee-replay.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete replay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// HTTP server settings
    pub server: ServerSettings,

    /// Interaction store settings
    pub store: StoreSettings,

    /// Trace ingestion settings
    pub ingest: IngestSettings,

    /// Callback delivery settings
    pub delivery: DeliverySettings,

    /// Matching settings
    pub matching: MatchingSettings,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,

    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
        }
    }
}

/// Interaction store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite database file
    pub path: PathBuf,

    /// Table used when no active table has been selected
    pub default_table: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            default_table: "calls".to_string(),
        }
    }
}

/// Trace ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Interactions buffered before a store flush
    pub batch_size: usize,

    /// Trace files are selected by this file name suffix
    pub file_suffix: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            file_suffix: ".xes.yaml".to_string(),
        }
    }
}

/// Callback delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub timeout_secs: u64,

    /// Idle connections kept per callback host
    pub pool_max_idle_per_host: usize,

    /// Additional attempts for retryable failures (0 = single attempt)
    pub max_retries: u32,

    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl DeliverySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            pool_max_idle_per_host: 10,
            max_retries: 0,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 30_000,
        }
    }
}

/// Matching settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// Fixed seed for candidate selection; random when unset
    pub seed: Option<u64>,
}

/// Default database location: the platform data directory, else the
/// working directory
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("cpee-replay").join("events.db"))
        .unwrap_or_else(|| PathBuf::from("events.db"))
}

/// Configuration loader
pub struct ConfigLoader {
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Use an explicit config file (takes precedence over discovery)
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration: file (if any), then environment overrides, then
    /// validation
    pub fn load(&self) -> ConfigResult<ReplayConfig> {
        let mut config = match self.find_config_file()? {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                self.load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                ReplayConfig::default()
            }
        };

        self.apply_env_overrides(&mut config);
        self.validate(&config)?;
        Ok(config)
    }

    fn find_config_file(&self) -> ConfigResult<Option<PathBuf>> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::NotFound(path.clone()));
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(ConfigError::NotFound(path));
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Ok(Some(local));
        }

        Ok(Self::default_config_path().filter(|p| p.exists()))
    }

    fn load_from_file(&self, path: &Path) -> ConfigResult<ReplayConfig> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut ReplayConfig) {
        if let Ok(val) = std::env::var("CPEE_REPLAY_HOST") {
            config.server.host = val;
        }
        if let Ok(val) = std::env::var("CPEE_REPLAY_PORT") {
            if let Ok(port) = val.parse() {
                config.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("CPEE_REPLAY_LOG_LEVEL") {
            config.server.log_level = val;
        }
        if let Ok(val) = std::env::var("CPEE_REPLAY_DB") {
            config.store.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CPEE_REPLAY_DEFAULT_TABLE") {
            config.store.default_table = val;
        }
        if let Ok(val) = std::env::var("CPEE_REPLAY_SEED") {
            if let Ok(seed) = val.parse() {
                config.matching.seed = Some(seed);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self, config: &ReplayConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.server.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.server.log_level, valid_levels
            )));
        }

        if config.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port cannot be 0".to_string(),
            ));
        }

        if config.ingest.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "Ingest batch size cannot be 0".to_string(),
            ));
        }

        if config.store.default_table.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Default table name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cpee-replay").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

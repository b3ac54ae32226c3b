use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlaybooksConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_min")]
    pub pool_min_connections: u32,

    #[serde(default = "default_pool_max")]
    pub pool_max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub pool_acquire_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

/// Structural bounds enforced on every update, whatever the actor may do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_webhook_urls")]
    pub max_webhook_urls: usize,

    #[serde(default = "default_max_broadcast_channels")]
    pub max_broadcast_channels: usize,

    #[serde(default = "default_max_metrics")]
    pub max_metrics_per_playbook: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Base URL of the team/channel directory. Empty means no HTTP oracle.
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_membership_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_membership_retries")]
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,

    #[serde(default = "default_storage_timeout")]
    pub storage_timeout_ms: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/playbooks_dev".to_string()
}

fn default_pool_min() -> u32 {
    1
}

fn default_pool_max() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_webhook_urls() -> usize {
    64
}

fn default_max_broadcast_channels() -> usize {
    64
}

fn default_max_metrics() -> usize {
    4
}

fn default_membership_timeout() -> u64 {
    2_000
}

fn default_membership_retries() -> u32 {
    3
}

fn default_conflict_retries() -> u32 {
    3
}

fn default_storage_timeout() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_min_connections: default_pool_min(),
            pool_max_connections: default_pool_max(),
            pool_acquire_timeout_secs: default_acquire_timeout(),
            pool_idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Builds the subscriber filter, letting `RUST_LOG` win when set.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_webhook_urls: default_max_webhook_urls(),
            max_broadcast_channels: default_max_broadcast_channels(),
            max_metrics_per_playbook: default_max_metrics(),
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            timeout_ms: default_membership_timeout(),
            retry_attempts: default_membership_retries(),
        }
    }
}

impl MembershipConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_conflict_retries(),
            storage_timeout_ms: default_storage_timeout(),
        }
    }
}

impl OrchestratorConfig {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

impl PlaybooksConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("PLAYBOOKS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        let mut playbooks_config: PlaybooksConfig = config.try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            playbooks_config.database.url = url;
        }

        if let Ok(level) = std::env::var("PLAYBOOKS_LOG_LEVEL") {
            playbooks_config.logging.level = level;
        }

        if let Ok(url) = std::env::var("PLAYBOOKS_MEMBERSHIP_URL") {
            playbooks_config.membership.base_url = url;
        }

        playbooks_config.validate()?;

        Ok(playbooks_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.database.url.is_empty() {
            return Err(ConfigLoadError::MissingRequired("database.url".to_string()));
        }

        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            return Err(ConfigLoadError::InvalidValue {
                key: "database.url".to_string(),
                message:
                    "Must be a valid PostgreSQL URL starting with postgres:// or postgresql://"
                        .to_string(),
            });
        }

        if self.database.pool_min_connections > self.database.pool_max_connections {
            return Err(ConfigLoadError::InvalidValue {
                key: "database.pool_min_connections".to_string(),
                message: "Cannot be greater than pool_max_connections".to_string(),
            });
        }

        let limits = [
            ("limits.max_webhook_urls", self.limits.max_webhook_urls),
            (
                "limits.max_broadcast_channels",
                self.limits.max_broadcast_channels,
            ),
            (
                "limits.max_metrics_per_playbook",
                self.limits.max_metrics_per_playbook,
            ),
        ];
        for (key, value) in limits {
            if value == 0 {
                return Err(ConfigLoadError::InvalidValue {
                    key: key.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }

        if self.membership.timeout_ms == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "membership.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if !self.membership.base_url.is_empty()
            && reqwest::Url::parse(&self.membership.base_url).is_err()
        {
            return Err(ConfigLoadError::InvalidValue {
                key: "membership.base_url".to_string(),
                message: format!("'{}' is not a valid URL", self.membership.base_url),
            });
        }

        if self.orchestrator.storage_timeout_ms == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "orchestrator.storage_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("playbooks.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("playbooks").join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    for path in get_dotenv_paths() {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

fn get_dotenv_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
        paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("playbooks").join(".env"));
    }

    paths
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("playbooks"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PlaybooksConfig::default();

        assert_eq!(config.database.url, "postgres://localhost/playbooks_dev");
        assert_eq!(config.database.pool_max_connections, 10);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert_eq!(config.limits.max_webhook_urls, 64);
        assert_eq!(config.limits.max_broadcast_channels, 64);
        assert_eq!(config.limits.max_metrics_per_playbook, 4);
        assert!(config.membership.base_url.is_empty());
        assert_eq!(config.membership.timeout(), Duration::from_secs(2));
        assert_eq!(config.membership.retry_attempts, 3);
        assert_eq!(config.orchestrator.max_conflict_retries, 3);
        assert_eq!(config.orchestrator.storage_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(PlaybooksConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_database_url() {
        let mut config = PlaybooksConfig::default();
        config.database.url = "mysql://localhost/test".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_limit() {
        let mut config = PlaybooksConfig::default();
        config.limits.max_webhook_urls = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("limits.max_webhook_urls"));
    }

    #[test]
    fn test_validation_bad_membership_url() {
        let mut config = PlaybooksConfig::default();
        config.membership.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.membership.base_url = "https://chat.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_complex_log_level() {
        let mut config = PlaybooksConfig::default();
        config.logging.level = "playbooks_core=debug,sqlx=warn".to_string();
        assert!(config.validate().is_ok());

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playbooks.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[limits]
max_webhook_urls = 16

[orchestrator]
max_conflict_retries = 7
"#
        )
        .unwrap();

        let config = PlaybooksConfig::load_from_paths(vec![path]).unwrap();
        assert_eq!(config.limits.max_webhook_urls, 16);
        assert_eq!(config.limits.max_metrics_per_playbook, 4);
        assert_eq!(config.orchestrator.max_conflict_retries, 7);
    }
}

//! Error types for the playbooks core library.
//!
//! Every rejection the engine produces carries a stable error code, an
//! [`ErrorKind`] that transport layers can map onto their own status model,
//! and the field or identity that caused it.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Database | Connection, query, migration errors |
//! | E2001-E2099 | Config | Environment, config file, and validation errors |
//! | E3001-E3099 | Lookup | Playbook and metric not found |
//! | E4001-E4099 | Authorization | Field-level permission and owner eligibility |
//! | E5001-E5099 | Structure | Limits, metric types, malformed field values |
//! | E6001-E6099 | Dependency | Membership directory / storage availability, write conflicts |
//! | E9001-E9099 | General | Internal, IO, serialization errors |

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry policy for membership lookups, which are idempotent reads.
    pub fn for_membership(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // up to 25% extra
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Cheap jitter source derived from the clock; returns a value in [0.0, 1.0).
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Coarse classification of a [`PlaybookError`], stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    InvalidOwner,
    LimitExceeded,
    InvalidMetricType,
    InvalidField,
    DependencyUnavailable,
    Conflict,
    Config,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InvalidOwner => "invalid_owner",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::InvalidMetricType => "invalid_metric_type",
            ErrorKind::InvalidField => "invalid_field",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// The main error type for the playbooks core library.
#[derive(Debug, Error)]
pub enum PlaybookError {
    // ========================================================================
    // Database Errors (E1001-E1099)
    // ========================================================================
    #[error("[E1001] Database connection failed: {message}")]
    DatabaseConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E1002] Database query failed: {0}")]
    DatabaseQueryFailed(String),

    #[error("[E1003] Database migration failed: {0}")]
    DatabaseMigrationFailed(String),

    #[error("[E1004] Database pool unavailable: {0}")]
    DatabasePoolUnavailable(String),

    // ========================================================================
    // Configuration Errors (E2001-E2099)
    // ========================================================================
    #[error("[E2004] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    #[error("[E2005] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    #[error("[E2006] Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Lookup Errors (E3001-E3099)
    // ========================================================================
    #[error("[E3001] Playbook not found: {0}")]
    PlaybookNotFound(String),

    #[error("[E3002] Metric not found: {0}")]
    MetricNotFound(String),

    // ========================================================================
    // Authorization Errors (E4001-E4099)
    // ========================================================================
    /// The actor lacks the capability needed for one specific changed field.
    #[error("[E4001] Permission denied for field '{field}': requires {requirement}{}", format_channels(.channels))]
    PermissionDenied {
        field: String,
        requirement: String,
        /// Channels the actor may not broadcast to, when that is the reason.
        channels: Vec<String>,
    },

    /// The proposed owner is not eligible, whatever the actor's own rights.
    #[error("[E4002] User '{owner_id}' cannot own playbooks of team '{team_id}': not a team member")]
    InvalidOwner { owner_id: String, team_id: String },

    // ========================================================================
    // Structural Errors (E5001-E5099)
    // ========================================================================
    #[error("[E5001] Too many entries for '{field}': {actual} exceeds the limit of {limit}")]
    LimitExceeded {
        field: String,
        limit: usize,
        actual: usize,
    },

    #[error("[E5002] Invalid metric type: '{0}'")]
    InvalidMetricType(String),

    #[error("[E5003] Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    // ========================================================================
    // Dependency Errors (E6001-E6099)
    // ========================================================================
    #[error("[E6001] {dependency} unavailable: {message}")]
    DependencyUnavailable { dependency: String, message: String },

    #[error("[E6002] Playbook '{playbook_id}' was modified concurrently")]
    Conflict { playbook_id: String },

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    #[error("[E9005] IO error: {0}")]
    IoError(String),

    #[error("[E9006] Serialization error: {0}")]
    SerializationError(String),
}

fn format_channels(channels: &[String]) -> String {
    if channels.is_empty() {
        String::new()
    } else {
        format!(" (channels: {})", channels.join(", "))
    }
}

impl PlaybookError {
    pub fn database_connection_failed(message: impl Into<String>) -> Self {
        PlaybookError::DatabaseConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn database_connection_failed_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PlaybookError::DatabaseConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        PlaybookError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn membership_unavailable(message: impl Into<String>) -> Self {
        PlaybookError::DependencyUnavailable {
            dependency: "membership directory".to_string(),
            message: message.into(),
        }
    }

    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        PlaybookError::DependencyUnavailable {
            dependency: "playbook storage".to_string(),
            message: message.into(),
        }
    }
}

pub type PlaybookResult<T> = Result<T, PlaybookError>;

// ============================================================================
// From trait implementations for seamless error propagation
// ============================================================================

impl From<sqlx::Error> for PlaybookError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => PlaybookError::DatabasePoolUnavailable(err.to_string()),
            sqlx::Error::PoolClosed => {
                PlaybookError::DatabasePoolUnavailable("Connection pool is closed".to_string())
            }
            sqlx::Error::RowNotFound => {
                PlaybookError::DatabaseQueryFailed("Row not found".to_string())
            }
            sqlx::Error::Configuration(_) => {
                PlaybookError::database_connection_failed(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                PlaybookError::DatabaseQueryFailed(db_err.to_string())
            }
            _ => PlaybookError::DatabaseQueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for PlaybookError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PlaybookError::DatabaseMigrationFailed(err.to_string())
    }
}

impl From<reqwest::Error> for PlaybookError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlaybookError::membership_unavailable("request timed out")
        } else if err.is_connect() {
            PlaybookError::membership_unavailable(format!("connection failed: {}", err))
        } else if err.is_decode() {
            PlaybookError::SerializationError(err.to_string())
        } else {
            PlaybookError::membership_unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PlaybookError {
    fn from(err: serde_json::Error) -> Self {
        PlaybookError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for PlaybookError {
    fn from(err: std::io::Error) -> Self {
        PlaybookError::IoError(err.to_string())
    }
}

impl From<config::ConfigError> for PlaybookError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => PlaybookError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::FileParse { uri, cause } => PlaybookError::ConfigParseError(
                format!("Failed to parse {}: {}", uri.unwrap_or_default(), cause),
            ),
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => PlaybookError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => PlaybookError::ConfigParseError(err.to_string()),
        }
    }
}

impl From<crate::config::ConfigLoadError> for PlaybookError {
    fn from(err: crate::config::ConfigLoadError) -> Self {
        match err {
            crate::config::ConfigLoadError::Config(e) => e.into(),
            crate::config::ConfigLoadError::MissingRequired(key) => {
                PlaybookError::InvalidConfigValue {
                    key,
                    message: "Missing required value".to_string(),
                }
            }
            crate::config::ConfigLoadError::InvalidValue { key, message } => {
                PlaybookError::InvalidConfigValue { key, message }
            }
            crate::config::ConfigLoadError::Io(e) => e.into(),
        }
    }
}

impl From<crate::db::DatabaseError> for PlaybookError {
    fn from(err: crate::db::DatabaseError) -> Self {
        match err {
            crate::db::DatabaseError::Unreachable(e) => {
                PlaybookError::database_connection_failed(e.to_string())
            }
            crate::db::DatabaseError::Migration(e) => {
                PlaybookError::DatabaseMigrationFailed(e.to_string())
            }
            invalid @ (crate::db::DatabaseError::MissingUrl
            | crate::db::DatabaseError::PoolBounds { .. }) => PlaybookError::InvalidConfigValue {
                key: "database".to_string(),
                message: invalid.to_string(),
            },
        }
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl PlaybookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybookError::PlaybookNotFound(_) | PlaybookError::MetricNotFound(_) => {
                ErrorKind::NotFound
            }
            PlaybookError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            PlaybookError::InvalidOwner { .. } => ErrorKind::InvalidOwner,
            PlaybookError::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            PlaybookError::InvalidMetricType(_) => ErrorKind::InvalidMetricType,
            PlaybookError::InvalidField { .. } => ErrorKind::InvalidField,
            PlaybookError::Conflict { .. } => ErrorKind::Conflict,
            PlaybookError::DependencyUnavailable { .. }
            | PlaybookError::DatabaseConnectionFailed { .. }
            | PlaybookError::DatabaseQueryFailed(_)
            | PlaybookError::DatabaseMigrationFailed(_)
            | PlaybookError::DatabasePoolUnavailable(_) => ErrorKind::DependencyUnavailable,
            PlaybookError::ConfigParseError(_)
            | PlaybookError::InvalidConfigValue { .. }
            | PlaybookError::Config(_) => ErrorKind::Config,
            PlaybookError::Internal(_)
            | PlaybookError::IoError(_)
            | PlaybookError::SerializationError(_) => ErrorKind::Internal,
        }
    }

    /// Rejections caused by the request itself rather than by the environment.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::PermissionDenied
                | ErrorKind::InvalidOwner
                | ErrorKind::LimitExceeded
                | ErrorKind::InvalidMetricType
                | ErrorKind::InvalidField
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybookError::DependencyUnavailable { .. }
                | PlaybookError::Conflict { .. }
                | PlaybookError::DatabasePoolUnavailable(_)
                | PlaybookError::DatabaseConnectionFailed { .. }
        )
    }

    pub fn suggested_retry_delay(&self) -> Option<u64> {
        match self {
            PlaybookError::DatabasePoolUnavailable(_) => Some(1),
            PlaybookError::DatabaseConnectionFailed { .. } => Some(2),
            PlaybookError::DependencyUnavailable { .. } => Some(2),
            PlaybookError::Conflict { .. } => Some(1),
            _ => None,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            PlaybookError::DatabaseConnectionFailed { .. } => "E1001",
            PlaybookError::DatabaseQueryFailed(_) => "E1002",
            PlaybookError::DatabaseMigrationFailed(_) => "E1003",
            PlaybookError::DatabasePoolUnavailable(_) => "E1004",
            PlaybookError::ConfigParseError(_) => "E2004",
            PlaybookError::InvalidConfigValue { .. } => "E2005",
            PlaybookError::Config(_) => "E2006",
            PlaybookError::PlaybookNotFound(_) => "E3001",
            PlaybookError::MetricNotFound(_) => "E3002",
            PlaybookError::PermissionDenied { .. } => "E4001",
            PlaybookError::InvalidOwner { .. } => "E4002",
            PlaybookError::LimitExceeded { .. } => "E5001",
            PlaybookError::InvalidMetricType(_) => "E5002",
            PlaybookError::InvalidField { .. } => "E5003",
            PlaybookError::DependencyUnavailable { .. } => "E6001",
            PlaybookError::Conflict { .. } => "E6002",
            PlaybookError::Internal(_) => "E9001",
            PlaybookError::IoError(_) => "E9005",
            PlaybookError::SerializationError(_) => "E9006",
        }
    }

    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            PlaybookError::DatabaseConnectionFailed { .. } => {
                Some("Check that PostgreSQL is running and DATABASE_URL is correct")
            }
            PlaybookError::DatabasePoolUnavailable(_) => {
                Some("The database is busy. Try again in a few seconds")
            }
            PlaybookError::PermissionDenied { channels, .. } if !channels.is_empty() => {
                Some("Join the listed channels or ask an admin to set the broadcast channels")
            }
            PlaybookError::InvalidOwner { .. } => {
                Some("Add the user to the playbook's team before making them the default owner")
            }
            PlaybookError::InvalidMetricType(_) => {
                Some("Use one of: metric_duration, metric_currency, metric_integer")
            }
            PlaybookError::Conflict { .. } => {
                Some("Another update landed first. Reload the playbook and try again")
            }
            _ => None,
        }
    }

    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.is_transient() || self.is_rejection() {
            warn!(
                error_code = %code,
                kind = %self.kind(),
                suggestion = suggestion,
                "Request failed: {}",
                self
            );
        } else {
            error!(
                error_code = %code,
                kind = %self.kind(),
                suggestion = suggestion,
                "Error occurred: {}",
                self
            );
        }
    }

}

// ============================================================================
// Retry utilities
// ============================================================================

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// `config.max_attempts` is used up.
pub async fn retry_async_with_config<F, Fut, T>(
    operation: F,
    config: RetryConfig,
) -> PlaybookResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = PlaybookResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        "Operation succeeded on attempt {} after {} retries",
                        attempt + 1,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_transient() || attempt == max_attempts - 1 {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| PlaybookError::Internal("Retry loop exhausted without error".to_string())))
}

// ============================================================================
// CLI error display
// ============================================================================

/// Renders an error for terminal output with suggestion and retry hints.
pub struct CliErrorDisplay<'a> {
    error: &'a PlaybookError,
    show_suggestion: bool,
}

impl<'a> CliErrorDisplay<'a> {
    pub fn new(error: &'a PlaybookError) -> Self {
        Self {
            error,
            show_suggestion: true,
        }
    }

    pub fn without_suggestion(mut self) -> Self {
        self.show_suggestion = false;
        self
    }
}

impl<'a> fmt::Display for CliErrorDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;

        if self.show_suggestion {
            if let Some(suggestion) = self.error.user_suggestion() {
                writeln!(f)?;
                writeln!(f, "  Suggestion: {}", suggestion)?;
            }
        }

        if self.error.is_transient() {
            if let Some(delay) = self.error.suggested_retry_delay() {
                writeln!(f)?;
                writeln!(
                    f,
                    "  This error may be temporary. Try again in {} seconds.",
                    delay
                )?;
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

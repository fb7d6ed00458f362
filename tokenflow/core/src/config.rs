//! TOML Configuration File Support
//!
//! Loads [`SessionDefaults`] from `~/.config/tokenflow/tokenflow.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [connection]
//! reconnect = true
//! max_reconnect_attempts = 5
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! jitter_factor = 0.3
//!
//! [batching]
//! flush_interval_ms = 16
//! max_batch_size = 50
//! adaptive_throttling = true
//! max_flush_interval_ms = 250
//! priority = "normal"
//!
//! [session]
//! timeout_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{BatchConfig, FlushPriority};
use crate::session::SessionDefaults;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[connection]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionToml {
    /// Whether drops are retried
    pub reconnect: Option<bool>,
    /// Retry budget
    pub max_reconnect_attempts: Option<u32>,
    /// First backoff delay in milliseconds
    pub initial_delay_ms: Option<u64>,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: Option<u64>,
    /// Relative jitter in `[0, 1)`
    pub jitter_factor: Option<f64>,
}

/// `[batching]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingToml {
    /// Base flush interval in milliseconds
    pub flush_interval_ms: Option<u64>,
    /// Most items per delivered batch
    pub max_batch_size: Option<usize>,
    /// Stretch the interval under load
    pub adaptive_throttling: Option<bool>,
    /// Interval ceiling in milliseconds
    pub max_flush_interval_ms: Option<u64>,
    /// `"high"` or `"normal"`
    pub priority: Option<FlushPriority>,
}

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Deadline for a terminal event, in seconds
    pub timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenflowToml {
    /// Connection section
    pub connection: ConnectionToml,
    /// Batching section
    pub batching: BatchingToml,
    /// Session section
    pub session: SessionToml,
}

/// Effective configuration plus where it came from
#[derive(Clone, Debug)]
pub struct TokenflowConfig {
    /// Defaults handed to every session
    pub defaults: SessionDefaults,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for TokenflowConfig {
    fn default() -> Self {
        Self {
            defaults: SessionDefaults::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl TokenflowConfig {
    /// Primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check the values that would break a session
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let defaults = &self.defaults;
        if defaults.batch.max_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if defaults.batch.flush_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        if defaults.batch.max_flush_interval < defaults.batch.flush_interval {
            return Err(ConfigError::ValidationError(format!(
                "max_flush_interval_ms ({}) is below flush_interval_ms ({})",
                defaults.batch.max_flush_interval.as_millis(),
                defaults.batch.flush_interval.as_millis()
            )));
        }
        let jitter = defaults.backoff.jitter_factor;
        if !(0.0..1.0).contains(&jitter) {
            return Err(ConfigError::ValidationError(format!(
                "jitter_factor must be in [0, 1), got {jitter}"
            )));
        }
        if defaults.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/tokenflow/tokenflow.toml` or
/// `~/.config/tokenflow/tokenflow.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tokenflow").join("tokenflow.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// resulting values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<TokenflowConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting values are invalid.
pub fn load_config_from_path(path: Option<&Path>) -> Result<TokenflowConfig, ConfigError> {
    let mut config = load_file(path)?;
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn load_file(path: Option<&Path>) -> Result<TokenflowConfig, ConfigError> {
    let mut config = TokenflowConfig::default();

    let Some(config_path) = path else {
        return Ok(config);
    };
    if !config_path.exists() {
        tracing::debug!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return Ok(config);
    }

    let toml_content =
        std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
            path: config_path.to_path_buf(),
            source: e,
        })?;
    let toml_config: TokenflowToml = toml::from_str(&toml_content)?;
    apply_toml_config(&mut config.defaults, &toml_config);
    config.config_file_path = Some(config_path.to_path_buf());
    config.source = ConfigSource::File;

    tracing::info!(
        path = %config_path.display(),
        "Loaded configuration from file"
    );
    Ok(config)
}

/// Apply TOML configuration values to the defaults
fn apply_toml_config(defaults: &mut SessionDefaults, toml: &TokenflowToml) {
    // Connection settings
    if let Some(reconnect) = toml.connection.reconnect {
        defaults.reconnect = reconnect;
    }
    if let Some(attempts) = toml.connection.max_reconnect_attempts {
        defaults.max_reconnect_attempts = attempts;
    }
    if let Some(ms) = toml.connection.initial_delay_ms {
        defaults.backoff.initial_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.connection.max_delay_ms {
        defaults.backoff.max_delay = Duration::from_millis(ms);
    }
    if let Some(jitter) = toml.connection.jitter_factor {
        defaults.backoff.jitter_factor = jitter;
    }

    // Batching settings
    if let Some(ms) = toml.batching.flush_interval_ms {
        if toml.batching.max_flush_interval_ms.is_some() {
            defaults.batch.flush_interval = Duration::from_millis(ms);
        } else {
            set_flush_interval(&mut defaults.batch, Duration::from_millis(ms));
        }
    }
    if let Some(size) = toml.batching.max_batch_size {
        defaults.batch.max_batch_size = size;
    }
    if let Some(enabled) = toml.batching.adaptive_throttling {
        defaults.batch.adaptive_throttling = enabled;
    }
    if let Some(ms) = toml.batching.max_flush_interval_ms {
        defaults.batch.max_flush_interval = Duration::from_millis(ms);
    }
    if let Some(priority) = toml.batching.priority {
        defaults.batch.priority = priority;
    }

    // Session settings
    if let Some(secs) = toml.session.timeout_secs {
        defaults.timeout = Duration::from_secs(secs);
    }
}

/// Set the base flush interval, lifting the ceiling to it if needed
fn set_flush_interval(batch: &mut BatchConfig, interval: Duration) {
    batch.flush_interval = interval;
    if batch.max_flush_interval < interval {
        batch.max_flush_interval = interval;
    }
}

/// Apply environment variable overrides, reading variables through `lookup`
fn apply_env_config(config: &mut TokenflowConfig, lookup: impl Fn(&str) -> Option<String>) {
    let defaults = &mut config.defaults;
    let mut touched = false;

    if let Some(enabled) = lookup("TOKENFLOW_RECONNECT") {
        defaults.reconnect = enabled != "0" && enabled.to_lowercase() != "false";
        touched = true;
    }
    if let Some(attempts) = lookup("TOKENFLOW_MAX_RECONNECT_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            defaults.max_reconnect_attempts = n;
            touched = true;
        }
    }
    if let Some(interval) = lookup("TOKENFLOW_FLUSH_INTERVAL_MS") {
        if let Ok(ms) = interval.parse::<u64>() {
            set_flush_interval(&mut defaults.batch, Duration::from_millis(ms));
            touched = true;
        }
    }
    if let Some(size) = lookup("TOKENFLOW_MAX_BATCH_SIZE") {
        if let Ok(n) = size.parse::<usize>() {
            defaults.batch.max_batch_size = n;
            touched = true;
        }
    }
    if let Some(timeout) = lookup("TOKENFLOW_TIMEOUT_SECS") {
        if let Ok(secs) = timeout.parse::<u64>() {
            defaults.timeout = Duration::from_secs(secs);
            touched = true;
        }
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Auto-reconnect override
    pub reconnect: Option<bool>,
    /// Retry budget override
    pub max_reconnect_attempts: Option<u32>,
    /// Batch bound override
    pub max_batch_size: Option<usize>,
    /// Flush interval override (milliseconds)
    pub flush_interval_ms: Option<u64>,
    /// Session timeout override (seconds)
    pub timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override auto-reconnect
    #[must_use]
    pub fn with_reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = Some(enabled);
        self
    }

    /// Override the retry budget
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Override the batch bound
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Override the base flush interval, lifting the ceiling if needed
    #[must_use]
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = Some(ms);
        self
    }

    /// Override the session timeout
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn is_empty(&self) -> bool {
        self.reconnect.is_none()
            && self.max_reconnect_attempts.is_none()
            && self.max_batch_size.is_none()
            && self.flush_interval_ms.is_none()
            && self.timeout_secs.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if an override produces an
    /// invalid configuration.
    pub fn apply(&self, config: &mut TokenflowConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        let defaults = &mut config.defaults;

        if let Some(enabled) = self.reconnect {
            defaults.reconnect = enabled;
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            defaults.max_reconnect_attempts = attempts;
        }
        if let Some(size) = self.max_batch_size {
            defaults.batch.max_batch_size = size;
        }
        if let Some(ms) = self.flush_interval_ms {
            set_flush_interval(&mut defaults.batch, Duration::from_millis(ms));
        }
        if let Some(secs) = self.timeout_secs {
            defaults.timeout = Duration::from_secs(secs);
        }

        config.source = ConfigSource::Cli;
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = TokenflowConfig::default();
        let defaults = &config.defaults;

        assert!(defaults.reconnect);
        assert_eq!(defaults.max_reconnect_attempts, 5);
        assert_eq!(defaults.backoff.initial_delay, Duration::from_millis(1000));
        assert_eq!(defaults.backoff.max_delay, Duration::from_millis(30_000));
        assert_eq!(defaults.batch.flush_interval, Duration::from_millis(16));
        assert_eq!(defaults.batch.max_batch_size, 50);
        assert_eq!(defaults.batch.priority, FlushPriority::Normal);
        assert_eq!(defaults.timeout, Duration::from_secs(300));
        assert_eq!(config.source(), ConfigSource::Default);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("tokenflow/tokenflow.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_config(
            r#"
[connection]
reconnect = false
max_reconnect_attempts = 9
initial_delay_ms = 250
max_delay_ms = 4000
jitter_factor = 0.1

[batching]
flush_interval_ms = 33
max_batch_size = 20
adaptive_throttling = false
max_flush_interval_ms = 500
priority = "high"

[session]
timeout_secs = 60
"#,
        );

        let config = load_file(Some(file.path())).unwrap();
        let defaults = &config.defaults;

        assert!(!defaults.reconnect);
        assert_eq!(defaults.max_reconnect_attempts, 9);
        assert_eq!(defaults.backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(defaults.backoff.max_delay, Duration::from_millis(4000));
        assert_eq!(defaults.backoff.jitter_factor, 0.1);
        assert_eq!(defaults.batch.flush_interval, Duration::from_millis(33));
        assert_eq!(defaults.batch.max_batch_size, 20);
        assert!(!defaults.batch.adaptive_throttling);
        assert_eq!(defaults.batch.max_flush_interval, Duration::from_millis(500));
        assert_eq!(defaults.batch.priority, FlushPriority::High);
        assert_eq!(defaults.timeout, Duration::from_secs(60));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_config("[batching]\nmax_batch_size = 5\n");

        let config = load_file(Some(file.path())).unwrap();
        assert_eq!(config.defaults.batch.max_batch_size, 5);
        assert_eq!(config.defaults.max_reconnect_attempts, 5);
        assert_eq!(config.defaults.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_missing_file_graceful() {
        let config = load_file(Some(Path::new("/nonexistent/tokenflow.toml"))).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_config("[batching\nmax_batch_size = ");
        let result = load_file(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    // =========================================================================
    // Environment and CLI Override Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = write_config("[connection]\nmax_reconnect_attempts = 9\n");
        let mut config = load_file(Some(file.path())).unwrap();

        apply_env_config(
            &mut config,
            env(&[
                ("TOKENFLOW_MAX_RECONNECT_ATTEMPTS", "2"),
                ("TOKENFLOW_RECONNECT", "false"),
                ("TOKENFLOW_TIMEOUT_SECS", "not-a-number"),
            ]),
        );

        assert_eq!(config.defaults.max_reconnect_attempts, 2);
        assert!(!config.defaults.reconnect);
        assert_eq!(config.defaults.timeout, Duration::from_secs(300));
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_empty_env_keeps_source() {
        let mut config = TokenflowConfig::default();
        apply_env_config(&mut config, env(&[]));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = TokenflowConfig::default();
        apply_env_config(&mut config, env(&[("TOKENFLOW_MAX_BATCH_SIZE", "10")]));

        ConfigOverrides::new()
            .with_max_batch_size(3)
            .with_timeout_secs(5)
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.defaults.batch.max_batch_size, 3);
        assert_eq!(config.defaults.timeout, Duration::from_secs(5));
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_flush_interval_override_lifts_ceiling() {
        let mut config = TokenflowConfig::default();
        ConfigOverrides::new()
            .with_flush_interval_ms(400)
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.defaults.batch.flush_interval, Duration::from_millis(400));
        assert_eq!(config.defaults.batch.max_flush_interval, Duration::from_millis(400));
    }

    #[test]
    fn test_env_flush_interval_lifts_ceiling() {
        let mut config = TokenflowConfig::default();
        apply_env_config(&mut config, env(&[("TOKENFLOW_FLUSH_INTERVAL_MS", "400")]));

        assert_eq!(config.defaults.batch.flush_interval, Duration::from_millis(400));
        assert_eq!(config.defaults.batch.max_flush_interval, Duration::from_millis(400));
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_file_flush_interval_lifts_ceiling_unless_set() {
        let file = write_config("[batching]\nflush_interval_ms = 300\n");
        let config = load_file(Some(file.path())).unwrap();
        assert_eq!(config.defaults.batch.max_flush_interval, Duration::from_millis(300));
        tokio_test::assert_ok!(config.validate());

        let file = write_config("[batching]\nflush_interval_ms = 300\nmax_flush_interval_ms = 100\n");
        let config = load_file(Some(file.path())).unwrap();
        assert_eq!(config.defaults.batch.max_flush_interval, Duration::from_millis(100));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = TokenflowConfig::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.defaults, SessionDefaults::default());
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validation_rejects_bad_values() {
        type Mutation = fn(&mut SessionDefaults);
        let cases: [(&str, Mutation); 4] = [
            ("batch size", |d| d.batch.max_batch_size = 0),
            ("flush interval", |d| d.batch.flush_interval = Duration::ZERO),
            ("jitter", |d| d.backoff.jitter_factor = 1.0),
            ("ceiling", |d| d.batch.max_flush_interval = Duration::from_millis(1)),
        ];

        for (name, mutate) in cases {
            let mut config = TokenflowConfig::default();
            mutate(&mut config.defaults);
            assert!(
                matches!(config.validate(), Err(ConfigError::ValidationError(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_zero_batch_override_is_rejected() {
        let mut config = TokenflowConfig::default();
        let result = ConfigOverrides::new().with_max_batch_size(0).apply(&mut config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ValidationError("test error".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test error");

        let err = ConfigError::ReadError {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("/test/path"));
    }
}

//! Configuration loading.
//!
//! Reads the YAML config file, interpolates environment variables, and
//! validates the result. Command-line flags are applied on top with
//! [`Config::apply_overrides`].

mod vars;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptySinkDatabaseSnafu, EmptySinkUrlSnafu, EmptySourcePathSnafu,
    EnvInterpolationSnafu, InvalidBatchSizeSnafu, InvalidConcurrencySnafu, NoSourcesSnafu,
    ReadFileSnafu, YamlParseSnafu,
};

pub use vars::{interpolate, interpolate_with};

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log sources keyed by name, processed in declaration order.
    pub sources: IndexMap<String, SourceConfig>,
    pub sink: SinkConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// An object store location holding hour folders of log files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Examples: "gs://rogerthat-logs", "s3://bucket/logs", "/var/log/app"
    pub path: String,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// InfluxDB sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Base URL, e.g. "http://localhost:8086".
    pub url: String,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// Maximum records per write call (default: 2000).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries of a chunk after a transient failure (default: 1).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff before the first retry, doubled per attempt (default: 500).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_batch_size() -> usize {
    2000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Username and password, when a username is configured and non-empty.
    pub fn credentials(&self) -> Option<(&str, Option<&str>)> {
        let username = self.username.as_deref().filter(|u| !u.is_empty())?;
        let password = self.password.as_deref().filter(|p| !p.is_empty());
        Some((username, password))
    }
}

/// Where per-source checkpoints are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Local directory or object store URL (default: "./data").
    #[serde(default = "default_state_path")]
    pub path: String,

    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            storage_options: HashMap::new(),
        }
    }
}

fn default_state_path() -> String {
    "./data".to_string()
}

/// Worker pool and polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum number of files processed concurrently (default: 2 x CPUs).
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    /// Seconds to wait between polls when idle (default: 120).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Attempts to persist state before the pipeline gives up (default: 5).
    #[serde(default = "default_persist_attempts")]
    pub persist_attempts: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: default_max_concurrent_files(),
            poll_interval_secs: default_poll_interval_secs(),
            persist_attempts: default_persist_attempts(),
        }
    }
}

fn default_max_concurrent_files() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(2)
}

fn default_poll_interval_secs() -> u64 {
    120
}

fn default_persist_attempts() -> u32 {
    5
}

impl ProcessingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            vars::interpolate(content).map_err(|errors| {
                EnvInterpolationSnafu {
                    message: errors.join("\n"),
                }
                .build()
            })?
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides. Call [`Config::validate`] afterwards.
    pub fn apply_overrides(&mut self, processes: Option<usize>, data_path: Option<String>) {
        if let Some(processes) = processes {
            self.processing.max_concurrent_files = processes;
        }
        if let Some(path) = data_path {
            self.state.path = path;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.sources.is_empty(), NoSourcesSnafu);
        for (name, source) in &self.sources {
            ensure!(
                !source.path.trim().is_empty(),
                EmptySourcePathSnafu { name: name.clone() }
            );
        }
        ensure!(!self.sink.url.trim().is_empty(), EmptySinkUrlSnafu);
        ensure!(!self.sink.database.trim().is_empty(), EmptySinkDatabaseSnafu);
        ensure!(self.sink.max_batch_size >= 1, InvalidBatchSizeSnafu);
        ensure!(
            self.processing.max_concurrent_files >= 1,
            InvalidConcurrencySnafu
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
sources:
  rogerthat:
    path: gs://rogerthat-logs
sink:
  url: http://localhost:8086
  database: monitoring
"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml(MINIMAL, false).unwrap();

        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources["rogerthat"].path, "gs://rogerthat-logs");
        assert_eq!(config.sink.max_batch_size, 2000);
        assert_eq!(config.sink.timeout(), Duration::from_secs(30));
        assert_eq!(config.sink.retry_attempts, 1);
        assert_eq!(config.sink.retry_backoff(), Duration::from_millis(500));
        assert_eq!(config.sink.credentials(), None);
        assert_eq!(config.state.path, "./data");
        assert!(config.processing.max_concurrent_files >= 2);
        assert_eq!(config.processing.poll_interval(), Duration::from_secs(120));
        assert_eq!(config.processing.persist_attempts, 5);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "0.0.0.0:9090");
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
sources:
  rogerthat:
    path: gs://rogerthat-logs
    storage_options:
      google_service_account: /etc/sa.json
  oca:
    path: /var/log/oca
sink:
  url: http://influx:8086
  database: monitoring
  username: admin
  password: secret
  max_batch_size: 500
  retry_attempts: 3
state:
  path: /var/lib/flurry
processing:
  max_concurrent_files: 8
  poll_interval_secs: 30
metrics:
  enabled: false
"#;
        let config = Config::from_yaml(yaml, false).unwrap();

        let names: Vec<_> = config.sources.keys().map(String::as_str).collect();
        assert_eq!(names, ["rogerthat", "oca"]);
        assert_eq!(config.sink.credentials(), Some(("admin", Some("secret"))));
        assert_eq!(config.sink.max_batch_size, 500);
        assert_eq!(config.sink.retry_attempts, 3);
        assert_eq!(config.state.path, "/var/lib/flurry");
        assert_eq!(config.processing.max_concurrent_files, 8);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_validation_errors() {
        let no_sources = "sources: {}\nsink:\n  url: http://x\n  database: db\n";
        assert!(matches!(
            Config::from_yaml(no_sources, false),
            Err(ConfigError::NoSources)
        ));

        let empty_path = "sources:\n  a:\n    path: ''\nsink:\n  url: http://x\n  database: db\n";
        assert!(matches!(
            Config::from_yaml(empty_path, false),
            Err(ConfigError::EmptySourcePath { name }) if name == "a"
        ));

        let no_db = "sources:\n  a:\n    path: /logs\nsink:\n  url: http://x\n  database: ''\n";
        assert!(matches!(
            Config::from_yaml(no_db, false),
            Err(ConfigError::EmptySinkDatabase)
        ));

        let zero_batch = "sources:\n  a:\n    path: /logs\nsink:\n  url: http://x\n  database: db\n  max_batch_size: 0\n";
        assert!(matches!(
            Config::from_yaml(zero_batch, false),
            Err(ConfigError::InvalidBatchSize)
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::from_yaml(MINIMAL, false).unwrap();
        config.apply_overrides(Some(3), Some("/tmp/state".to_string()));
        assert_eq!(config.processing.max_concurrent_files, 3);
        assert_eq!(config.state.path, "/tmp/state");

        config.apply_overrides(Some(0), None);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConcurrency)
        ));
    }

    #[test]
    fn test_missing_env_var_reported() {
        let yaml = "sources:\n  a:\n    path: $FLURRY_TEST_UNSET_SOURCE_PATH\nsink:\n  url: http://x\n  database: db\n";
        let err = Config::from_yaml(yaml, true).unwrap_err();
        match err {
            ConfigError::EnvInterpolation { message } => {
                assert!(message.contains("FLURRY_TEST_UNSET_SOURCE_PATH"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flurry.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.sink.database, "monitoring");

        assert!(matches!(
            Config::from_file(dir.path().join("missing.yaml")),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}

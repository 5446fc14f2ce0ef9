//! Configuration management.
//!
//! Configuration is resolved in layers:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, `$WEBHOOK_ENGINE_CONFIG_PATH`, or the platform
//!    config dir)
//! 3. `WEBHOOK_ENGINE_*` environment variables
//!
//! # Example
//!
//! ```toml
//! data_dir = "/var/lib/webhook-engine"
//!
//! [delivery]
//! timeout_ms = 10000
//!
//! [delivery.bulkhead]
//! per_endpoint = 4
//! global = 64
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1000
//! max_delay_ms = 600000
//! auto_disable_after = 5
//!
//! [worker]
//! poll_interval_ms = 1000
//! max_in_flight = 256
//!
//! [observability.logging]
//! format = "json"
//!
//! [observability.metrics]
//! enabled = true
//! port = 9090
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage;
use crate::webhooks::{DeliveryConfig, RetryConfig, WorkerConfig};
use crate::{Error, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "WEBHOOK_ENGINE_CONFIG_PATH";

/// Logging section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Default level when no filter is given (`info`, `debug`, ...).
    pub level: Option<String>,
    /// Full `EnvFilter` directive, e.g. `webhook_engine=debug,reqwest=warn`.
    pub filter: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Metrics section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Whether to install the Prometheus recorder.
    pub enabled: Option<bool>,
    /// Port for the Prometheus HTTP listener.
    pub port: Option<u16>,
}

/// Observability section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Logging settings.
    pub logging: Option<LoggingSettings>,
    /// Metrics settings.
    pub metrics: Option<MetricsSettings>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Delivery settings.
    pub delivery: Option<DeliveryConfig>,
    /// Retry settings.
    pub retry: Option<RetryConfig>,
    /// Worker settings.
    pub worker: Option<WorkerConfig>,
    /// Observability settings.
    pub observability: Option<ObservabilitySettings>,
}

/// Main configuration for the webhook engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    /// Directory holding the webhook database.
    pub data_dir: PathBuf,
    /// Request timeout and bulkheads.
    pub delivery: DeliveryConfig,
    /// Backoff, attempt budget and auto-disable threshold.
    pub retry: RetryConfig,
    /// Background worker settings.
    pub worker: WorkerConfig,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: storage::default_data_dir(),
            delivery: DeliveryConfig::default(),
            retry: RetryConfig::default(),
            worker: WorkerConfig::default(),
            observability: ObservabilitySettings::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the configuration for a process.
    ///
    /// Uses `path` if given, else `$WEBHOOK_ENGINE_CONFIG_PATH`, else the
    /// default location. Environment overrides are applied last and the
    /// result is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file cannot be read or parsed,
    /// or if the resulting values are invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let config = match explicit {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::load_default(),
        }
        .with_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::from_toml(&contents).map_err(|e| match e {
            Error::OperationFailed { operation, cause } => Error::OperationFailed {
                operation,
                cause: format!("{}: {cause}", path.display()),
            },
            other => other,
        })
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the platform config dir
    /// (`~/.config/webhook-engine/config.toml` on Linux).
    ///
    /// Returns the default configuration if no readable file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(dirs) = directories::ProjectDirs::from("", "", "webhook-engine") else {
            return Self::default();
        };

        let path = dirs.config_dir().join("config.toml");
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                Self::default()
            },
        }
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(delivery) = file.delivery {
            config.delivery = delivery;
        }
        if let Some(retry) = file.retry {
            config.retry = retry;
        }
        if let Some(worker) = file.worker {
            config.worker = worker;
        }
        if let Some(observability) = file.observability {
            config.observability = observability;
        }

        config
    }

    /// Applies `WEBHOOK_ENGINE_*` environment variables.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    /// Applies overrides from a variable lookup.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(dir) = value("WEBHOOK_ENGINE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        override_parsed(&value, "WEBHOOK_ENGINE_TIMEOUT_MS", &mut self.delivery.timeout_ms);
        override_parsed(
            &value,
            "WEBHOOK_ENGINE_BULKHEAD_PER_ENDPOINT",
            &mut self.delivery.bulkhead.per_endpoint,
        );
        override_parsed(
            &value,
            "WEBHOOK_ENGINE_BULKHEAD_GLOBAL",
            &mut self.delivery.bulkhead.global,
        );
        override_parsed(&value, "WEBHOOK_ENGINE_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        override_parsed(&value, "WEBHOOK_ENGINE_BASE_DELAY_MS", &mut self.retry.base_delay_ms);
        override_parsed(&value, "WEBHOOK_ENGINE_MAX_DELAY_MS", &mut self.retry.max_delay_ms);
        override_parsed(
            &value,
            "WEBHOOK_ENGINE_AUTO_DISABLE_AFTER",
            &mut self.retry.auto_disable_after,
        );
        override_parsed(
            &value,
            "WEBHOOK_ENGINE_POLL_INTERVAL_MS",
            &mut self.worker.poll_interval_ms,
        );
        override_parsed(
            &value,
            "WEBHOOK_ENGINE_WORKER_MAX_IN_FLIGHT",
            &mut self.worker.max_in_flight,
        );

        let logging = self.observability.logging.get_or_insert_with(LoggingSettings::default);
        if let Some(format) = value("WEBHOOK_ENGINE_LOG_FORMAT") {
            logging.format = Some(format);
        }
        if let Some(level) = value("WEBHOOK_ENGINE_LOG_LEVEL") {
            logging.level = Some(level);
        }
        if let Some(file) = value("WEBHOOK_ENGINE_LOG_FILE") {
            logging.file = Some(PathBuf::from(file));
        }

        let metrics = self.observability.metrics.get_or_insert_with(MetricsSettings::default);
        if let Some(enabled) = value("WEBHOOK_ENGINE_METRICS_ENABLED") {
            metrics.enabled = Some(matches!(
                enabled.to_lowercase().as_str(),
                "true" | "1" | "yes"
            ));
        }
        if let Some(port) = value("WEBHOOK_ENGINE_METRICS_PORT").and_then(|v| v.parse().ok()) {
            metrics.port = Some(port);
        }
    }

    /// Checks that the values can drive the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidInput(format!("Invalid configuration: {msg}")));

        if self.delivery.timeout_ms == 0 {
            return invalid("delivery.timeout_ms must be greater than 0");
        }
        if self.delivery.bulkhead.per_endpoint == 0 || self.delivery.bulkhead.global == 0 {
            return invalid("delivery.bulkhead limits must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return invalid("retry.jitter must be between 0 and 1");
        }
        if self.worker.batch_size == 0 || self.worker.max_in_flight == 0 {
            return invalid("worker.batch_size and worker.max_in_flight must be greater than 0");
        }
        Ok(())
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Path of the webhook database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        storage::database_path(&self.data_dir)
    }
}

fn override_parsed<T: std::str::FromStr>(
    value: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = value(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}

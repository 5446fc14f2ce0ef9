//! Structured logging configuration.

use std::path::PathBuf;

use crate::config::LoggingSettings;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name; anything but `json` is pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive.
    pub filter: String,
    /// Log file; stderr when `None`.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from config settings and `RUST_LOG`.
    ///
    /// Filter precedence: `verbose`, then `RUST_LOG`, then the configured
    /// filter, then the configured level, then `info`.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let rust_log = std::env::var("RUST_LOG").ok();
        Self::resolve(settings, verbose, rust_log.as_deref())
    }

    fn resolve(settings: Option<&LoggingSettings>, verbose: bool, rust_log: Option<&str>) -> Self {
        let format = settings
            .and_then(|s| s.format.as_deref())
            .map(LogFormat::parse)
            .unwrap_or_default();

        let filter = if verbose {
            "webhook_engine=debug,info".to_string()
        } else if let Some(directive) = rust_log.filter(|v| !v.trim().is_empty()) {
            directive.to_string()
        } else if let Some(directive) = settings.and_then(|s| s.filter.clone()) {
            directive
        } else {
            settings
                .and_then(|s| s.level.clone())
                .unwrap_or_else(|| "info".to_string())
        };

        Self {
            format,
            filter,
            file: settings.and_then(|s| s.file.clone()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
            file: None,
        }
    }
}

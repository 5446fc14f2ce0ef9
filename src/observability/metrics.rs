//! Prometheus metrics.

use std::net::{Ipv4Addr, SocketAddr};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsSettings;
use crate::{Error, Result};

/// Metrics configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Address to bind the metrics exporter.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self::from_settings(None)
    }
}

impl MetricsConfig {
    /// Default exporter port.
    pub const DEFAULT_PORT: u16 = 9090;

    /// Builds metrics configuration from config settings.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        let settings = settings.cloned().unwrap_or_default();
        let port = settings.port.unwrap_or(Self::DEFAULT_PORT);

        Self {
            enabled: settings.enabled == Some(true),
            listen_addr: (Ipv4Addr::UNSPECIFIED, port).into(),
        }
    }
}

/// Installs the Prometheus recorder, plus an HTTP listener when `expose` is set.
///
/// Returns `None` when metrics are disabled; the `metrics` macros are then
/// no-ops.
///
/// # Errors
///
/// Returns an error if a recorder is already installed, the listener cannot
/// be built, or `expose` is requested outside a tokio runtime.
pub fn install_prometheus(config: &MetricsConfig, expose: bool) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let handle = if expose {
        serve(config.listen_addr)?
    } else {
        PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| recorder_error(&e))?
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        expose,
        "Installed Prometheus metrics recorder"
    );
    Ok(Some(handle))
}

/// Installs the recorder and serves `/metrics` on `addr` from the current runtime.
fn serve(addr: SocketAddr) -> Result<PrometheusHandle> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|e| Error::OperationFailed {
        operation: "serve_metrics".to_string(),
        cause: format!("metrics listener needs a tokio runtime: {e}"),
    })?;

    let (recorder, exporter) = {
        let _entered = runtime.enter();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "serve_metrics".to_string(),
                cause: e.to_string(),
            })?
    };

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|e| recorder_error(&e))?;
    runtime.spawn(exporter);
    Ok(handle)
}

fn recorder_error(e: &impl std::fmt::Display) -> Error {
    Error::OperationFailed {
        operation: "install_metrics_recorder".to_string(),
        cause: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let config = MetricsConfig::from_settings(None);
        assert!(!config.enabled);
        assert_eq!(config.listen_addr.port(), 9090);

        let config = MetricsConfig::from_settings(Some(&MetricsSettings {
            enabled: Some(true),
            port: Some(9191),
        }));
        assert!(config.enabled);
        assert_eq!(config.listen_addr.port(), 9191);
    }

    #[test]
    fn test_disabled_installs_nothing() {
        let handle = install_prometheus(&MetricsConfig::default(), false).unwrap();
        assert!(handle.is_none());
    }
}

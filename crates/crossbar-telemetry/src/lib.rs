//! # crossbar-telemetry
//!
//! Process-wide observability setup: a `tracing` subscriber filtered by
//! `RUST_LOG` (or the configured level) and an optional Prometheus recorder
//! for the `metrics` facade.

#![deny(unsafe_code)]

mod metrics;

pub use metrics::install_recorder;
pub use metrics_exporter_prometheus::PrometheusHandle;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"tungstenite" => WARN`).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Install the Prometheus recorder.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: vec![("tungstenite".to_string(), Level::WARN)],
            json: false,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// `EnvFilter` directives derived from the configured levels.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push(',');
            filter.push_str(module);
            filter.push('=');
            filter.push_str(&level.to_string().to_lowercase());
        }
        filter
    }
}

/// Telemetry initialisation failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Handles kept alive for the lifetime of the process.
pub struct TelemetryGuard {
    prometheus: Option<PrometheusHandle>,
}

impl TelemetryGuard {
    /// The Prometheus handle, when metrics are enabled.
    pub fn prometheus(&self) -> Option<&PrometheusHandle> {
        self.prometheus.as_ref()
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let plain_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(plain_layer)
        .try_init()?;

    let prometheus = if config.metrics_enabled {
        Some(install_recorder()?)
    } else {
        None
    };

    Ok(TelemetryGuard { prometheus })
}

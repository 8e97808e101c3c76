//! Logging setup.
//!
//! Installs a `tracing` subscriber with an env-driven filter. Optional JSON
//! output for deployments that ship logs to a collector.

use tracing_subscriber::EnvFilter;

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level filter, `EnvFilter` syntax.
    pub log_level: String,
    /// Emit JSON-formatted log lines.
    pub json_format: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_format: false,
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            json_format: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.json_format),
        }
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init_tracing(config: &TelemetryConfig) {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // An error means a subscriber is already installed.
    let _ = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

//! # Shardline Telemetry
//!
//! Process-wide observability setup.
//!
//! - **Logs**: `tracing` events rendered by a `tracing-subscriber` registry,
//!   pretty for development or JSON for log shippers.
//! - **Metrics**: node-level Prometheus metrics on a private registry.
//!   Subsystem crates register their own metrics on the default registry
//!   (behind their `metrics` feature); [`encode_metrics`] exports both.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SC_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `SC_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `SC_SERVICE_NAME` | `shardline` | Service name in log lines |
//! | `SC_NETWORK` | `devnet` | Network name |

mod config;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{encode_metrics, register_metrics, MetricsHandle};
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Telemetry already initialized")]
    AlreadyInitialized,
}

/// Install the subscriber and register node metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    let tracing = tracing_setup::init_tracing(&config)?;

    tracing::info!(
        service = %config.service_name,
        network = %config.network,
        json_logs = config.json_logs,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        _tracing: tracing,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

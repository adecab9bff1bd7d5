//! Node-level Prometheus metrics.
//!
//! Naming convention: `sc_<area>_<metric>_<unit>`.

use lazy_static::lazy_static;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global node registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Drivers currently running
    pub static ref DRIVERS_RUNNING: Gauge = Gauge::new(
        "sc_orchestrator_drivers_running",
        "Number of BFT drivers currently running"
    ).expect("metric creation failed");

    /// Driver starts and stops by chain
    pub static ref DRIVER_RESTARTS: IntCounterVec = IntCounterVec::new(
        Opts::new("sc_orchestrator_driver_transitions_total", "Driver start/stop transitions"),
        &["chain", "transition"]
    ).expect("metric creation failed");

    /// Inbound messages dropped before reaching a driver
    pub static ref INBOUND_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("sc_orchestrator_inbound_dropped_total", "Inbound messages dropped"),
        &["reason"]
    ).expect("metric creation failed");

    /// Committee size per chain
    pub static ref COMMITTEE_SIZE: GaugeVec = GaugeVec::new(
        Opts::new("sc_committee_size", "Committee size per chain"),
        &["chain"]
    ).expect("metric creation failed");

    /// Current epoch of the committee state
    pub static ref COMMITTEE_EPOCH: Gauge = Gauge::new(
        "sc_committee_epoch",
        "Epoch of the published committee state"
    ).expect("metric creation failed");

    /// Errors by subsystem and type
    pub static ref SUBSYSTEM_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("sc_subsystem_errors_total", "Errors by subsystem and type"),
        &["subsystem", "error_type"]
    ).expect("metric creation failed");
}

/// Keeps the registry alive for the lifetime of the telemetry guard.
pub struct MetricsHandle {
    _registry: Registry,
}

/// Register node metrics on [`REGISTRY`]. Calling twice fails.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(DRIVERS_RUNNING.clone()),
        Box::new(DRIVER_RESTARTS.clone()),
        Box::new(INBOUND_DROPPED.clone()),
        Box::new(COMMITTEE_SIZE.clone()),
        Box::new(COMMITTEE_EPOCH.clone()),
        Box::new(SUBSYSTEM_ERRORS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: REGISTRY.clone(),
    })
}

/// Encode node and subsystem metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let mut families = REGISTRY.gather();
    families.extend(prometheus::gather());

    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

//! Telemetry configuration from environment variables.

use std::env;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive string.
    pub log_level: String,

    pub console_output: bool,

    pub json_logs: bool,

    /// Network identifier (devnet, testnet, mainnet)
    pub network: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "shardline".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            network: "devnet".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// - `SC_SERVICE_NAME`: Service name (default: shardline)
    /// - `SC_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `SC_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `SC_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    /// - `SC_NETWORK`: Network name (default: devnet)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("SC_SERVICE_NAME").unwrap_or_else(|_| "shardline".to_string()),

            log_level: env::var("SC_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("SC_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("SC_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            network: env::var("SC_NETWORK").unwrap_or_else(|_| "devnet".to_string()),
        }
    }

    /// Configuration for a node role, e.g. `shardline-beacon`.
    pub fn for_role(role: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = format!("{}-{}", config.service_name, role);
        config
    }
}

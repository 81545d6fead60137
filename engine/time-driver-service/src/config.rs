//! Service configuration management

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use time_driver::{CommonConfig, DriverConfig, SimulatorConfig};

/// Environment variables that override single configuration keys
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("TIME_DRIVER_LOG_LEVEL", "logging.level"),
    ("TIME_DRIVER_LOG_FORMAT", "logging.format"),
    ("TIME_DRIVER_LOG_FILE", "logging.file"),
    ("TIME_DRIVER_CONNECTION_STRING", "common.nos-connection-string"),
    ("TIME_DRIVER_REAL_MICROS_PER_TICK", "common.real-microseconds-per-tick"),
    ("TIME_DRIVER_COMMAND_ADDR", "simulator.hardware-model.command.listen-addr"),
    ("TIME_DRIVER_METRICS_ENABLED", "metrics.enabled"),
];

/// Main service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServiceConfig {
    /// Settings shared by every simulator
    pub common: CommonConfig,

    /// TimeDriver simulator section
    pub simulator: SimulatorConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json, text)
    pub format: String,

    /// Log file path, rotated daily (if None, logs to stderr)
    pub file: Option<PathBuf>,
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MetricsConfig {
    /// Serve Prometheus metrics
    pub enabled: bool,

    /// Address of the Prometheus scrape endpoint
    pub listen_addr: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string(), file: None }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, listen_addr: "127.0.0.1:9090".to_string() }
    }
}

impl ServiceConfig {
    /// The part of the configuration the driver itself reads
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig { common: self.common.clone(), simulator: self.simulator.clone() }
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid metrics address: {}", self.metrics.listen_addr))
    }
}

/// Load configuration from an optional TOML file and environment variables
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading overrides through `lookup`
pub fn load_config_with(
    path: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ServiceConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        tracing::debug!("Loading configuration from file: {:?}", path);
        builder = builder.add_source(File::new(&path.to_string_lossy(), FileFormat::Toml).required(true));
    }
    builder = apply_env_overrides(builder, lookup)?;

    let config: ServiceConfig = builder
        .build()
        .context("Failed to read configuration sources")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigBuilder<DefaultState>> {
    for (variable, key) in ENV_OVERRIDES {
        builder = builder
            .set_override_option(*key, lookup(variable))
            .with_context(|| format!("Failed to apply {variable}"))?;
    }
    Ok(builder)
}

/// Validate configuration
fn validate_config(config: &ServiceConfig) -> Result<()> {
    // Validate log level
    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow::anyhow!("Invalid log level: {}", config.logging.level)),
    }

    // Validate log format
    match config.logging.format.as_str() {
        "json" | "pretty" | "text" => {}
        _ => return Err(anyhow::anyhow!("Invalid log format: {}", config.logging.format)),
    }

    if config.metrics.enabled {
        config.metrics_addr()?;
    }

    config.driver_config().validate().context("Invalid driver configuration")?;
    Ok(())
}

//! Configuration for TimeDriver

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bus::EndpointDescriptor;
use crate::error::ConfigError;
use crate::rate::RateSettings;
use crate::{
    DEFAULT_COMMAND_ADDR, DEFAULT_CONNECTION_STRING, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_REAL_MICROS_PER_TICK, DEFAULT_REPORT_INTERVAL_MS, DEFAULT_SIM_MICROS_PER_TICK,
    DEFAULT_TIME_BUS_NAME, TIME_CONNECTION_TYPE, TIME_DRIVER_MODEL,
};

/// Configuration for the TimeDriver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DriverConfig {
    /// Settings shared by every simulator in the deployment
    pub common: CommonConfig,

    /// Settings for this simulator
    pub simulator: SimulatorConfig,
}

/// Settings shared by every simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CommonConfig {
    /// Default bus connection string
    pub nos_connection_string: String,

    /// Absolute time of tick zero, in seconds
    pub absolute_start_time: f64,

    /// Simulated microseconds represented by one tick
    pub sim_microseconds_per_tick: u64,

    /// Wall-clock microseconds between ticks at start-up
    pub real_microseconds_per_tick: u64,

    /// Tick index the clock starts from
    pub initial_tick: u64,
}

/// Settings for this simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimulatorConfig {
    /// Instance name, used in logs
    pub name: String,

    /// Whether the driver runs at all
    pub active: bool,

    pub hardware_model: HardwareModelConfig,
}

/// Hardware model section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HardwareModelConfig {
    /// Registry name of the model to build
    #[serde(rename = "type")]
    pub model_type: String,

    /// Configured bus connections; only those of type "time" are used
    pub connections: Vec<ConnectionConfig>,

    /// Remote command channel
    pub command: CommandChannelConfig,

    /// Interactive console
    pub console: ConsoleConfig,

    /// Pacing loop tuning
    pub scheduler: SchedulerConfig,
}

/// One configured bus connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectionConfig {
    /// Connection type; "time" marks a time bus
    #[serde(rename = "type")]
    pub kind: String,

    /// Bus name (default "command")
    pub bus_name: Option<String>,

    /// Connection string overriding the common one
    pub nos_connection_string_override: Option<String>,
}

/// Remote command channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CommandChannelConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

/// Interactive console configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConsoleConfig {
    pub enabled: bool,
}

/// Pacing loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Interval between metrics log lines, in milliseconds
    pub report_interval_ms: u64,

    /// Timeout for a single bus connection attempt, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            nos_connection_string: DEFAULT_CONNECTION_STRING.to_string(),
            absolute_start_time: 0.0,
            sim_microseconds_per_tick: DEFAULT_SIM_MICROS_PER_TICK,
            real_microseconds_per_tick: DEFAULT_REAL_MICROS_PER_TICK,
            initial_tick: 0,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            name: "time".to_string(),
            active: true,
            hardware_model: HardwareModelConfig::default(),
        }
    }
}

impl Default for HardwareModelConfig {
    fn default() -> Self {
        Self {
            model_type: TIME_DRIVER_MODEL.to_string(),
            connections: Vec::new(),
            command: CommandChannelConfig::default(),
            console: ConsoleConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for CommandChannelConfig {
    fn default() -> Self {
        Self { enabled: true, listen_addr: DEFAULT_COMMAND_ADDR.to_string() }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl SchedulerConfig {
    /// Get report interval as Duration
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl DriverConfig {
    /// Rate controller settings from the common section
    pub fn rate_settings(&self) -> RateSettings {
        RateSettings {
            sim_micros_per_tick: self.common.sim_microseconds_per_tick,
            real_micros_per_tick: self.common.real_microseconds_per_tick,
            absolute_start_time: self.common.absolute_start_time,
            initial_tick: self.common.initial_tick,
        }
    }

    /// Time bus endpoints: connections of type "time", defaults filled in, duplicates removed
    pub fn endpoint_descriptors(&self) -> Vec<EndpointDescriptor> {
        let mut descriptors: Vec<EndpointDescriptor> = Vec::new();
        for connection in &self.simulator.hardware_model.connections {
            if connection.kind != TIME_CONNECTION_TYPE {
                continue;
            }
            let descriptor = EndpointDescriptor {
                uri: connection
                    .nos_connection_string_override
                    .clone()
                    .unwrap_or_else(|| self.common.nos_connection_string.clone()),
                name: connection
                    .bus_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TIME_BUS_NAME.to_string()),
            };
            if !descriptors.contains(&descriptor) {
                descriptors.push(descriptor);
            }
        }
        descriptors
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.common.sim_microseconds_per_tick == 0 {
            return Err(ConfigError::InvalidValue {
                field: "common.sim-microseconds-per-tick",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.common.real_microseconds_per_tick == 0 {
            return Err(ConfigError::InvalidValue {
                field: "common.real-microseconds-per-tick",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !self.common.absolute_start_time.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "common.absolute-start-time",
                reason: "must be finite".to_string(),
            });
        }
        let command = &self.simulator.hardware_model.command;
        if command.enabled && command.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "simulator.hardware-model.command.listen-addr",
                reason: format!("'{}' is not a socket address", command.listen_addr),
            });
        }
        Ok(())
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DriverConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

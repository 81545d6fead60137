//! Error types for TimeDriver

use thiserror::Error;

/// Errors that can occur in the TimeDriver
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Tick scheduler is not running")]
    SchedulerStopped,

    #[error("Tick scheduler dropped the reply")]
    ReplyDropped,
}

/// Errors related to time bus endpoints
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Failed to connect to time bus {name} at {uri}: {reason}")]
    Connect { uri: String, name: String, reason: String },

    #[error("Timed out connecting to time bus {name} at {uri}")]
    ConnectTimeout { uri: String, name: String },

    #[error("Time bus {name} is disconnected")]
    Disconnected { name: String },

    #[error("Failed to publish to time bus {name}: {reason}")]
    Publish { name: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Errors produced while parsing a command argument.
///
/// These never leave the command interpreter; they are turned into reply strings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("INVALID ARGUMENT: {verb} expects a number, got '{argument}'")]
    Malformed { verb: &'static str, argument: String },

    #[error("INVALID ARGUMENT: {verb} expects a finite number, got '{argument}'")]
    NonFinite { verb: &'static str, argument: String },

    #[error("INVALID ARGUMENT: {verb} expects a non-negative duration, got '{argument}'")]
    Negative { verb: &'static str, argument: String },
}

/// Errors related to the hardware model registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No hardware model registered under '{0}'")]
    Unknown(String),

    #[error("Hardware model '{0}' is already registered")]
    Duplicate(String),
}

impl CommandError {
    /// Reply string sent back to whoever issued the command
    pub fn reply(&self) -> String {
        self.to_string()
    }
}

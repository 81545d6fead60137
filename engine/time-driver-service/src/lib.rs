//! TimeDriver service library
//!
//! Configuration loading, logging setup and signal handling for the `time-driver` binary.

use anyhow::{Context, Result};
use std::path::Path;

pub mod config;
pub mod logging;
pub mod signals;

pub use config::{LoggingConfig, MetricsConfig, ServiceConfig};
pub use logging::initialize_logging;
pub use signals::{graceful_shutdown, model_outcome, setup_signal_handlers};

/// Load configuration from an optional file and environment variables
pub fn load_configuration(path: Option<&Path>) -> Result<ServiceConfig> {
    config::load_config(path).context("Failed to load service configuration")
}

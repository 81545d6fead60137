//! # TimeDriver
//!
//! The authoritative time source for a distributed simulation.
//!
//! The driver advances a discrete simulated clock, paces it against wall-clock time at a
//! configurable speed-up factor, broadcasts every fired tick to the configured time buses and
//! accepts pause/resume/rate commands from the console and from a remote command channel.
//!
//! All pacing state lives inside a single [`TickScheduler`] task. Every other component talks to
//! it through a [`ClockHandle`], so there is exactly one mutator of the tick index, the pause
//! target and the real-time rate.

pub mod bus;
pub mod calendar;
pub mod command;
pub mod config;
pub mod console;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod rate;
pub mod registry;
pub mod remote;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod tests;

pub use bus::{BroadcastReport, BusConnector, BusPublisherPool, EndpointDescriptor, TimeBus};
pub use command::{Command, ControlInput};
pub use config::{CommonConfig, ConnectionConfig, DriverConfig, SimulatorConfig};
pub use console::{ConsoleSink, KeyInput, KeyReader, TerminalConsole};
pub use driver::TimeDriver;
pub use error::{BusError, CommandError, ConfigError, DriverError, RegistryError};
pub use metrics::{DriverMetrics, MetricsCollector};
pub use rate::{ClockStatus, PauseStatus, PauseTarget, RateController, RateSettings};
pub use registry::{HardwareModel, ModelContext, ModelRegistry};
pub use remote::CommandServer;
pub use scheduler::{ClockHandle, ControlInbox, TickScheduler};
pub use transport::WsBusConnector;

/// Simulated step counter type
pub type TickIndex = u64;

/// Current version of the TimeDriver
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registry name of the time driver hardware model
pub const TIME_DRIVER_MODEL: &str = "TimeDriver";

/// Connection type that marks a configured connection as a time bus
pub const TIME_CONNECTION_TYPE: &str = "time";

/// Default simulated microseconds represented by one tick (100 Hz)
pub const DEFAULT_SIM_MICROS_PER_TICK: u64 = 10_000;

/// Default wall-clock microseconds between ticks (real time)
pub const DEFAULT_REAL_MICROS_PER_TICK: u64 = 10_000;

/// Fastest and slowest allowed speed-up factor
pub const MAX_SPEED_FACTOR: u64 = 100;

/// Default bus connection string
pub const DEFAULT_CONNECTION_STRING: &str = "ws://127.0.0.1:12001";

/// Default time bus name
pub const DEFAULT_TIME_BUS_NAME: &str = "command";

/// Default listen address of the remote command channel
pub const DEFAULT_COMMAND_ADDR: &str = "127.0.0.1:12002";

/// Default metrics report interval
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 1000;

/// Default bus connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 500;

//! TimeDriver Service
//!
//! Loads configuration, builds the configured hardware model, wires up the interactive console
//! and runs until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

use time_driver::console::{spawn_key_listener, RawModeGuard};
use time_driver::{ClockHandle, ConsoleSink, ModelContext, ModelRegistry, TerminalConsole, WsBusConnector};
use time_driver_service::{
    graceful_shutdown, initialize_logging, load_configuration, model_outcome, setup_signal_handlers,
    ServiceConfig,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "time-driver", version, about = "Paced simulation clock that publishes ticks to time buses")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run without the interactive console
    #[arg(long)]
    no_console: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn install_metrics_exporter(config: &ServiceConfig) -> Result<()> {
    let addr = config.metrics_addr()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Serving metrics on {}", addr);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = load_configuration(args.config.as_deref())?;
    if args.print_config {
        println!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    let console_enabled = config.simulator.hardware_model.console.enabled
        && config.simulator.active
        && !args.no_console
        && std::io::stdout().is_terminal();

    // Initialize logging first
    let _log_guard = initialize_logging(&config.logging, console_enabled)?;
    info!("Starting TimeDriver v{}", time_driver::VERSION);

    if config.metrics.enabled {
        install_metrics_exporter(&config)?;
    }

    let driver_config = config.driver_config();
    let connector = Arc::new(WsBusConnector::new(
        driver_config.simulator.hardware_model.scheduler.connect_timeout(),
    ));
    let (handle, inbox) = ClockHandle::channel();

    let raw_mode = if console_enabled {
        Some(RawModeGuard::enable().context("Failed to put the terminal in raw mode")?)
    } else {
        None
    };
    let console: Option<Box<dyn ConsoleSink>> = if console_enabled {
        Some(Box::new(TerminalConsole::new()))
    } else {
        None
    };

    let registry = ModelRegistry::with_builtin();
    let model = registry
        .build(&driver_config, ModelContext { connector, handle: handle.clone(), inbox, console })
        .context("Failed to build hardware model")?;
    info!(model = model.name(), "Hardware model built");

    let shutdown_signal = setup_signal_handlers()?;
    info!("Signal handlers configured");

    let key_stop = Arc::new(AtomicBool::new(false));
    let (interrupt_tx, interrupt_rx) = oneshot::channel();
    let key_thread = if console_enabled {
        Some(spawn_key_listener(handle, key_stop.clone(), Some(interrupt_tx))?)
    } else {
        None
    };

    let (model_stop, model_stop_rx) = oneshot::channel();
    let mut model_task = tokio::spawn(model.run(model_stop_rx));
    info!("TimeDriver is running. Press Ctrl+C to shutdown gracefully.");

    let finished_early = tokio::select! {
        _ = shutdown_signal => None,
        Ok(()) = interrupt_rx => None,
        result = &mut model_task => Some(result),
    };

    let outcome = match finished_early {
        Some(result) => {
            warn!("Hardware model stopped on its own");
            model_outcome(result)
        }
        None => {
            info!("Shutdown signal received. Initiating graceful shutdown...");
            graceful_shutdown(model_stop, model_task, SHUTDOWN_TIMEOUT).await
        }
    };

    key_stop.store(true, Ordering::Relaxed);
    if let Some(key_thread) = key_thread {
        let _ = tokio::task::spawn_blocking(move || key_thread.join()).await;
    }
    drop(raw_mode);

    outcome?;
    info!("TimeDriver shutdown complete");
    Ok(())
}

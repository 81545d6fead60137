//! Signal handling for graceful shutdown

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use time_driver::DriverError;

/// Resolve the returned receiver on Ctrl+C or SIGTERM
pub fn setup_signal_handlers() -> Result<oneshot::Receiver<()>> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    #[cfg(unix)]
    let sigterm = {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, flag.clone())
            .context("Failed to register SIGTERM handler")?;
        flag
    };

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C signal: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminated = async {
            use std::sync::atomic::Ordering;

            // Poll for signal
            while !sigterm.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        #[cfg(not(unix))]
        let terminated = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Ctrl+C signal received"),
            _ = terminated => info!("SIGTERM signal received"),
        }
        let _ = shutdown_tx.send(());
    });

    Ok(shutdown_rx)
}

/// Stop the hardware model and wait for it, up to `shutdown_timeout`
pub async fn graceful_shutdown(
    stop: oneshot::Sender<()>,
    mut model_task: JoinHandle<Result<(), DriverError>>,
    shutdown_timeout: Duration,
) -> Result<()> {
    info!("Starting graceful shutdown...");
    let _ = stop.send(());

    match timeout(shutdown_timeout, &mut model_task).await {
        Ok(result) => model_outcome(result),
        Err(_) => {
            warn!("Hardware model did not stop within timeout, forcing shutdown");
            model_task.abort();
            Ok(())
        }
    }
}

/// Turn a finished model task into the process result
pub fn model_outcome(result: Result<Result<(), DriverError>, tokio::task::JoinError>) -> Result<()> {
    result
        .context("Hardware model task failed")?
        .context("Hardware model stopped with an error")
}

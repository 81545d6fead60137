//! The time driver hardware model

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, info_span, warn, Instrument};

use crate::bus::BusPublisherPool;
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::metrics::MetricsCollector;
use crate::rate::RateController;
use crate::registry::{HardwareModel, ModelContext};
use crate::remote::CommandServer;
use crate::scheduler::{ClockHandle, TickScheduler};

/// Paces the simulated clock and publishes every fired tick to the configured time buses.
///
/// An inactive driver builds nothing and idles until shutdown.
pub struct TimeDriver {
    name: String,
    state: DriverState,
}

enum DriverState {
    Inactive,
    Active(Box<ActiveDriver>),
}

struct ActiveDriver {
    scheduler: TickScheduler,
    handle: ClockHandle,
    command_addr: Option<String>,
}

pub(crate) fn construct(
    config: &DriverConfig,
    context: ModelContext,
) -> Result<Box<dyn HardwareModel>, DriverError> {
    Ok(Box::new(TimeDriver::from_config(config, context)?))
}

impl TimeDriver {
    pub fn from_config(config: &DriverConfig, context: ModelContext) -> Result<Self, DriverError> {
        let name = config.simulator.name.clone();
        if !config.simulator.active {
            return Ok(Self { name, state: DriverState::Inactive });
        }
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::new());
        let mut pool = BusPublisherPool::new(context.connector, metrics.clone());
        for descriptor in config.endpoint_descriptors() {
            pool.register(descriptor);
        }
        if pool.is_empty() {
            warn!(simulator = %name, "No time connections configured, ticks will not be published");
        }

        let model = &config.simulator.hardware_model;
        let rate = RateController::new(config.rate_settings())?;
        let mut scheduler = TickScheduler::new(rate, pool, context.inbox, metrics)
            .with_report_interval(model.scheduler.report_interval());
        if let Some(console) = context.console {
            scheduler = scheduler.with_console(console);
        }

        let command_addr = model.command.enabled.then(|| model.command.listen_addr.clone());
        Ok(Self {
            name,
            state: DriverState::Active(Box::new(ActiveDriver {
                scheduler,
                handle: context.handle,
                command_addr,
            })),
        })
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, DriverState::Active(_))
    }
}

impl ActiveDriver {
    async fn run(self, shutdown: oneshot::Receiver<()>) -> Result<(), DriverError> {
        let ActiveDriver { mut scheduler, handle, command_addr } = self;

        let server_stop = match command_addr {
            Some(addr) => {
                let server = CommandServer::bind(&addr, handle).await?;
                let (stop_tx, stop_rx) = oneshot::channel();
                tokio::spawn(server.run(stop_rx).in_current_span());
                Some(stop_tx)
            }
            None => None,
        };

        let pool = scheduler.pool_mut();
        let connected = pool.connect_all().await;
        info!(connected, endpoints = pool.len(), "Time buses connected");

        let metrics = scheduler.run(shutdown).await;
        if let Some(stop_tx) = server_stop {
            let _ = stop_tx.send(());
        }
        info!(
            ticks_fired = metrics.ticks_fired,
            publishes = metrics.publishes,
            publish_failures = metrics.publish_failures,
            reconnects = metrics.reconnects,
            "Time driver stopped"
        );
        Ok(())
    }
}

#[async_trait]
impl HardwareModel for TimeDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self: Box<Self>, shutdown: oneshot::Receiver<()>) -> Result<(), DriverError> {
        let span = info_span!("time_driver", name = %self.name);
        match self.state {
            DriverState::Inactive => {
                async {
                    info!("Time driver is not active");
                    let _ = shutdown.await;
                    Ok(())
                }
                .instrument(span)
                .await
            }
            DriverState::Active(active) => active.run(shutdown).instrument(span).await,
        }
    }
}

//! Bus publisher pool: deduplicated time bus endpoints kept alive and fed every fired tick

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::BusError;
use crate::metrics::MetricsCollector;
use crate::TickIndex;

/// Identity of a time bus endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Connection string of the bus server
    pub uri: String,
    /// Bus name on that server
    pub name: String,
}

/// A live connection able to accept time-set calls
#[async_trait]
pub trait TimeBus: Send {
    fn is_connected(&self) -> bool;

    /// Arm the connection to accept time-set calls
    async fn enable_set_time(&mut self) -> Result<(), BusError>;

    /// Set the current tick index on the bus
    async fn set_time(&mut self, tick: TickIndex) -> Result<(), BusError>;
}

/// Creates [`TimeBus`] connections
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self, descriptor: &EndpointDescriptor) -> Result<Box<dyn TimeBus>, BusError>;
}

/// One pooled endpoint; owns its connection exclusively
pub struct Endpoint {
    descriptor: EndpointDescriptor,
    connection: Option<Box<dyn TimeBus>>,
}

/// What happened to one endpoint during a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishOutcome {
    Published { reconnected: bool },
    PublishFailed { reconnected: bool },
    Unreachable,
}

/// Summary of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub published: usize,
    pub reconnected: usize,
    pub failed: usize,
}

impl Endpoint {
    fn new(descriptor: EndpointDescriptor) -> Self {
        Self { descriptor, connection: None }
    }

    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|bus| bus.is_connected())
    }

    /// Tear down the current connection and build a fresh one for the same identity
    async fn reconnect(&mut self, connector: &dyn BusConnector) -> Result<(), BusError> {
        self.connection = None;
        let mut bus = connector.connect(&self.descriptor).await?;
        bus.enable_set_time().await?;
        self.connection = Some(bus);
        Ok(())
    }

    async fn publish(&mut self, connector: &dyn BusConnector, tick: TickIndex) -> PublishOutcome {
        let mut reconnected = false;
        if !self.is_connected() {
            info!(
                bus = %self.descriptor.name,
                uri = %self.descriptor.uri,
                tick,
                "Time bus disconnected, reconnecting"
            );
            if let Err(e) = self.reconnect(connector).await {
                warn!(bus = %self.descriptor.name, "Reconnect failed: {}", e);
                return PublishOutcome::Unreachable;
            }
            reconnected = true;
        }

        let Some(bus) = self.connection.as_mut() else {
            return PublishOutcome::Unreachable;
        };
        match bus.set_time(tick).await {
            Ok(()) => PublishOutcome::Published { reconnected },
            Err(e) => {
                warn!(bus = %self.descriptor.name, tick, "Failed to publish tick: {}", e);
                PublishOutcome::PublishFailed { reconnected }
            }
        }
    }
}

/// The set of time bus endpoints the clock publishes to
pub struct BusPublisherPool {
    connector: Arc<dyn BusConnector>,
    endpoints: Vec<Endpoint>,
    metrics: Arc<MetricsCollector>,
}

impl BusPublisherPool {
    pub fn new(connector: Arc<dyn BusConnector>, metrics: Arc<MetricsCollector>) -> Self {
        Self { connector, endpoints: Vec::new(), metrics }
    }

    /// Add an endpoint unless one with the same uri and name is already pooled.
    ///
    /// Returns true if the endpoint was added.
    pub fn register(&mut self, descriptor: EndpointDescriptor) -> bool {
        if self.endpoints.iter().any(|endpoint| endpoint.descriptor == descriptor) {
            debug!(bus = %descriptor.name, uri = %descriptor.uri, "Time bus already registered");
            return false;
        }
        debug!(bus = %descriptor.name, uri = %descriptor.uri, "Registering time bus");
        self.endpoints.push(Endpoint::new(descriptor));
        self.metrics.update_endpoints(self.endpoints.len());
        true
    }

    /// Connect every endpoint once. Failures are logged; broadcast retries them.
    pub async fn connect_all(&mut self) -> usize {
        let connector = self.connector.as_ref();
        let results = join_all(self.endpoints.iter_mut().map(|endpoint| async move {
            match endpoint.reconnect(connector).await {
                Ok(()) => {
                    info!(bus = %endpoint.descriptor.name, uri = %endpoint.descriptor.uri, "Time bus connected");
                    true
                }
                Err(e) => {
                    warn!(bus = %endpoint.descriptor.name, "Initial connect failed: {}", e);
                    false
                }
            }
        }))
        .await;
        results.into_iter().filter(|connected| *connected).count()
    }

    /// Publish a tick to every endpoint, reconnecting dead ones first
    pub async fn broadcast(&mut self, tick: TickIndex) -> BroadcastReport {
        let connector = self.connector.as_ref();
        let outcomes = join_all(
            self.endpoints.iter_mut().map(|endpoint| endpoint.publish(connector, tick)),
        )
        .await;

        let mut report = BroadcastReport::default();
        for outcome in outcomes {
            match outcome {
                PublishOutcome::Published { reconnected } => {
                    report.published += 1;
                    report.reconnected += reconnected as usize;
                }
                PublishOutcome::PublishFailed { reconnected } => {
                    report.failed += 1;
                    report.reconnected += reconnected as usize;
                }
                PublishOutcome::Unreachable => report.failed += 1,
            }
        }
        self.metrics.record_broadcast(&report);
        report
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn connected_count(&self) -> usize {
        self.endpoints.iter().filter(|endpoint| endpoint.is_connected()).count()
    }
}

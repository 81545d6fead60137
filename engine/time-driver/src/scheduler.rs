//! Tick scheduler: the pacing loop and the single owner of clock state

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::bus::BusPublisherPool;
use crate::command::{self, Command, ControlInput};
use crate::console::ConsoleSink;
use crate::error::DriverError;
use crate::metrics::{DriverMetrics, MetricsCollector};
use crate::rate::{ClockStatus, RateController};

/// One request to the scheduler; the reply, if wanted, comes back on `reply`
#[derive(Debug)]
pub struct ControlRequest {
    pub input: ControlInput,
    pub reply: Option<oneshot::Sender<String>>,
}

/// Receiving side of the control channel, consumed by the [`TickScheduler`]
pub struct ControlInbox {
    requests: mpsc::UnboundedReceiver<ControlRequest>,
    status: watch::Sender<ClockStatus>,
}

/// Cloneable handle for talking to a running [`TickScheduler`]
#[derive(Clone)]
pub struct ClockHandle {
    requests: mpsc::UnboundedSender<ControlRequest>,
    status: watch::Receiver<ClockStatus>,
}

impl ClockHandle {
    /// Create a connected handle/inbox pair
    pub fn channel() -> (ClockHandle, ControlInbox) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClockStatus::default());
        (
            ClockHandle { requests: request_tx, status: status_rx },
            ControlInbox { requests: request_rx, status: status_tx },
        )
    }

    /// Send raw command text and wait for the reply
    pub async fn send(&self, text: impl Into<String>) -> Result<String, DriverError> {
        self.request(ControlInput::Text(text.into())).await
    }

    /// Send a parsed command and wait for the reply
    pub async fn apply(&self, command: Command) -> Result<String, DriverError> {
        self.request(ControlInput::Command(command)).await
    }

    async fn request(&self, input: ControlInput) -> Result<String, DriverError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(ControlRequest { input, reply: Some(reply_tx) })
            .map_err(|_| DriverError::SchedulerStopped)?;
        reply_rx.await.map_err(|_| DriverError::ReplyDropped)
    }

    /// Send input and block the current thread until the reply arrives.
    ///
    /// For plain threads only; panics if called from within an async context.
    pub fn blocking_request(&self, input: ControlInput) -> Result<String, DriverError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(ControlRequest { input, reply: Some(reply_tx) })
            .map_err(|_| DriverError::SchedulerStopped)?;
        reply_rx.blocking_recv().map_err(|_| DriverError::ReplyDropped)
    }

    /// Queue input without waiting for a reply; usable from non-async threads
    pub fn submit(&self, input: ControlInput) -> Result<(), DriverError> {
        self.requests
            .send(ControlRequest { input, reply: None })
            .map_err(|_| DriverError::SchedulerStopped)
    }

    /// Latest published clock status
    pub fn status(&self) -> ClockStatus {
        self.status.borrow().clone()
    }

    /// Subscribe to status updates
    pub fn subscribe(&self) -> watch::Receiver<ClockStatus> {
        self.status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

/// The pacing loop.
///
/// Owns the rate controller and the publisher pool. Commands arrive over the control channel and
/// are applied between ticks, so no other task ever touches pacing state.
pub struct TickScheduler {
    rate: RateController,
    pool: BusPublisherPool,
    inbox: ControlInbox,
    console: Option<Box<dyn ConsoleSink>>,
    metrics: Arc<MetricsCollector>,
    report_interval: Duration,
}

impl TickScheduler {
    pub fn new(
        rate: RateController,
        pool: BusPublisherPool,
        inbox: ControlInbox,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            rate,
            pool,
            inbox,
            console: None,
            metrics,
            report_interval: Duration::from_millis(crate::DEFAULT_REPORT_INTERVAL_MS),
        }
    }

    pub fn with_console(mut self, console: Box<dyn ConsoleSink>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn pool_mut(&mut self) -> &mut BusPublisherPool {
        &mut self.pool
    }

    /// Run until `shutdown` fires (or its sender is dropped).
    ///
    /// Returns the final metrics.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> DriverMetrics {
        info!(
            tick = self.rate.tick_index(),
            sim_us_per_tick = self.rate.sim_micros_per_tick(),
            real_us_per_tick = self.rate.real_micros_per_tick(),
            endpoints = self.pool.len(),
            "Starting tick scheduler"
        );

        self.publish_status();
        self.render();

        let mut last_tick = Instant::now();
        let mut last_report = Instant::now();
        let mut inbox_open = true;

        loop {
            let deadline = last_tick + self.rate.tick_period();
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                request = self.inbox.requests.recv(), if inbox_open => match request {
                    Some(request) => self.handle_request(request),
                    None => {
                        debug!("All clock handles dropped, control channel closed");
                        inbox_open = false;
                    }
                },

                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    let interval = now - last_tick;
                    last_tick = now;
                    self.on_tick_boundary(interval).await;

                    if last_report.elapsed() >= self.report_interval {
                        self.report();
                        last_report = Instant::now();
                    }
                }
            }
        }

        let metrics = self.metrics.get_metrics();
        info!(
            tick = self.rate.tick_index(),
            ticks_fired = metrics.ticks_fired,
            "Tick scheduler stopped"
        );
        metrics
    }

    /// One pacing iteration: advance, broadcast what fired, refresh display
    async fn on_tick_boundary(&mut self, interval: Duration) {
        let fired = self.rate.advance();
        if let Some(tick) = fired {
            self.rate.record_interval(interval);
            self.pool.broadcast(tick).await;
        }
        self.metrics.record_iteration(fired, interval);

        if self.rate.display_due() {
            self.render();
        }
        self.publish_status();
    }

    fn handle_request(&mut self, request: ControlRequest) {
        let reply = match &request.input {
            ControlInput::Text(text) => command::execute(&mut self.rate, text),
            ControlInput::Command(command) => command::apply(&mut self.rate, command),
        };
        self.metrics.record_command();
        debug!(input = ?request.input, reply = %reply, "Applied control input");

        // Status goes out before the reply so a requester never reads a stale snapshot
        self.publish_status();
        self.render();
        if let Some(reply_tx) = request.reply {
            // Requester may have given up waiting
            let _ = reply_tx.send(reply);
        }
    }

    fn publish_status(&self) {
        self.inbox.status.send_replace(self.rate.status());
    }

    fn render(&mut self) {
        if let Some(console) = self.console.as_mut() {
            console.render(&self.rate.status());
        }
    }

    fn report(&self) {
        let metrics = self.metrics.get_metrics();
        debug!(
            tick = self.rate.tick_index(),
            ticks_fired = metrics.ticks_fired,
            publishes = metrics.publishes,
            publish_failures = metrics.publish_failures,
            reconnects = metrics.reconnects,
            last_interval_us = metrics.last_interval_us,
            connected = self.pool.connected_count(),
            "Tick metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::{descriptor, MemoryConnector};
    use crate::rate::{PauseStatus, RateSettings};

    fn create_test_scheduler(
        real_micros_per_tick: u64,
    ) -> (Arc<MemoryConnector>, ClockHandle, TickScheduler) {
        let connector = Arc::new(MemoryConnector::default());
        let metrics = Arc::new(MetricsCollector::new());
        let mut pool = BusPublisherPool::new(connector.clone(), metrics.clone());
        pool.register(descriptor("ws://a:1", "command"));

        let rate = RateController::new(RateSettings {
            sim_micros_per_tick: 10_000,
            real_micros_per_tick,
            absolute_start_time: 0.0,
            initial_tick: 0,
        })
        .unwrap();
        let (handle, inbox) = ClockHandle::channel();
        (connector, handle, TickScheduler::new(rate, pool, inbox, metrics))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_are_paced_and_published() {
        let (connector, handle, scheduler) = create_test_scheduler(10_000);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(scheduler.run(stop_rx));

        // Ticks fire at 10ms, 20ms, ... 50ms
        tokio::time::sleep(Duration::from_micros(55_000)).await;
        assert_eq!(handle.status().tick_index, 5);

        stop_tx.send(()).unwrap();
        let metrics = task.await.unwrap();
        assert_eq!(metrics.ticks_fired, 5);
        // Never connected up front, so the first broadcast reconnects
        assert_eq!(metrics.reconnects, 1);
        assert_eq!(connector.published(&descriptor("ws://a:1", "command")), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_publishing() {
        let (connector, handle, scheduler) = create_test_scheduler(10_000);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(scheduler.run(stop_rx));

        tokio::time::sleep(Duration::from_micros(25_000)).await;
        assert_eq!(handle.send("pause").await.unwrap(), "PAUSE");
        let held = handle.status().tick_index;
        assert_eq!(handle.status().pause, PauseStatus::Paused);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.status().tick_index, held);
        assert!(handle.status().display_tick_index > held);

        assert_eq!(handle.send("UNPAUSE").await.unwrap(), "UNPAUSE");
        tokio::time::sleep(Duration::from_micros(25_000)).await;
        assert!(handle.status().tick_index > held);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
        let published = connector.published(&descriptor("ws://a:1", "command"));
        assert!(published.windows(2).all(|pair| pair[1] == pair[0] + 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_for_holds_at_target() {
        let (_connector, handle, scheduler) = create_test_scheduler(10_000);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(scheduler.run(stop_rx));

        handle.send("PAUSE").await.unwrap();
        assert_eq!(handle.send("RUN 0.05").await.unwrap(), "RUN");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = handle.status();
        assert_eq!(status.tick_index, 5);
        assert_eq!(status.pause, PauseStatus::Paused);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_change_applies_to_next_deadline() {
        let (_connector, handle, scheduler) = create_test_scheduler(10_000);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(scheduler.run(stop_rx));

        assert_eq!(handle.send("INCREASE").await.unwrap(), "INCREASE");
        assert_eq!(handle.status().real_micros_per_tick, 20_000);
        tokio::time::sleep(Duration::from_micros(105_000)).await;
        assert_eq!(handle.status().tick_index, 5);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_stopped_scheduler() {
        let (_connector, handle, scheduler) = create_test_scheduler(10_000);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(scheduler.run(stop_rx));
        stop_tx.send(()).unwrap();
        task.await.unwrap();

        assert!(matches!(handle.send("PAUSE").await, Err(DriverError::SchedulerStopped)));
        assert!(handle.submit(ControlInput::Command(Command::Toggle)).is_err());
    }

    #[tokio::test]
    async fn test_blocking_request_from_a_plain_thread() {
        let (_connector, handle, scheduler) = create_test_scheduler(10_000);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(scheduler.run(stop_rx));

        let replies = tokio::task::spawn_blocking(move || {
            let empty_run = handle.blocking_request(ControlInput::Text("RUN ".to_string()));
            let pause = handle.blocking_request(ControlInput::Command(Command::Pause));
            (empty_run.unwrap(), pause.unwrap())
        })
        .await
        .unwrap();
        assert_eq!(replies, (command::INVALID_COMMAND_REPLY.to_string(), "PAUSE".to_string()));

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }
}

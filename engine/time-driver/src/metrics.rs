//! Metrics collection for TimeDriver

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::bus::BroadcastReport;
use crate::TickIndex;

/// Metrics collected by the TimeDriver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverMetrics {
    /// Last tick index published
    pub last_tick: TickIndex,

    /// Scheduler iterations, paused or not
    pub iterations: u64,

    /// Ticks that actually fired
    pub ticks_fired: u64,

    /// Pooled time bus endpoints
    pub endpoints: u64,

    /// Successful per-endpoint publishes
    pub publishes: u64,

    /// Per-endpoint publishes that failed or could not reach the bus
    pub publish_failures: u64,

    /// Successful reconnects
    pub reconnects: u64,

    /// Commands applied, from any source
    pub commands: u64,

    /// Last measured interval between ticks in microseconds
    pub last_interval_us: u64,

    /// Measured tick rate since start, in Hz
    pub tick_rate_hz: f64,

    /// Driver uptime in seconds
    pub uptime_seconds: u64,
}

/// Metrics collector for the TimeDriver
pub struct MetricsCollector {
    last_tick: AtomicU64,
    iterations: AtomicU64,
    ticks_fired: AtomicU64,
    endpoints: AtomicU64,
    publishes: AtomicU64,
    publish_failures: AtomicU64,
    reconnects: AtomicU64,
    commands: AtomicU64,
    last_interval_us: AtomicU64,

    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            last_tick: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            ticks_fired: AtomicU64::new(0),
            endpoints: AtomicU64::new(0),
            publishes: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            last_interval_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one scheduler iteration; `fired` is the tick that fired, if any
    pub fn record_iteration(&self, fired: Option<TickIndex>, interval: Duration) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        if let Some(tick) = fired {
            let interval_us = interval.as_micros() as u64;
            self.last_tick.store(tick, Ordering::Relaxed);
            self.ticks_fired.fetch_add(1, Ordering::Relaxed);
            self.last_interval_us.store(interval_us, Ordering::Relaxed);

            metrics::counter!("time_driver_ticks_total", 1);
            metrics::gauge!("time_driver_tick_index", tick as f64);
            metrics::histogram!("time_driver_tick_interval_us", interval_us as f64);
        }
    }

    /// Record the outcome of one broadcast
    pub fn record_broadcast(&self, report: &BroadcastReport) {
        self.publishes.fetch_add(report.published as u64, Ordering::Relaxed);
        self.publish_failures.fetch_add(report.failed as u64, Ordering::Relaxed);
        self.reconnects.fetch_add(report.reconnected as u64, Ordering::Relaxed);

        metrics::counter!("time_driver_publishes_total", report.published as u64);
        if report.failed > 0 {
            metrics::counter!("time_driver_publish_failures_total", report.failed as u64);
        }
        if report.reconnected > 0 {
            metrics::counter!("time_driver_reconnects_total", report.reconnected as u64);
        }
    }

    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("time_driver_commands_total");
    }

    pub fn update_endpoints(&self, count: usize) {
        self.endpoints.store(count as u64, Ordering::Relaxed);
        metrics::gauge!("time_driver_endpoints", count as f64);
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> DriverMetrics {
        let uptime = self.start_time.elapsed();
        let ticks_fired = self.ticks_fired.load(Ordering::Relaxed);
        let tick_rate_hz = if uptime.as_secs_f64() > 0.0 {
            ticks_fired as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };

        DriverMetrics {
            last_tick: self.last_tick.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            ticks_fired,
            endpoints: self.endpoints.load(Ordering::Relaxed),
            publishes: self.publishes.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            last_interval_us: self.last_interval_us.load(Ordering::Relaxed),
            tick_rate_hz,
            uptime_seconds: uptime.as_secs(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.last_tick.store(0, Ordering::Relaxed);
        self.iterations.store(0, Ordering::Relaxed);
        self.ticks_fired.store(0, Ordering::Relaxed);
        self.publishes.store(0, Ordering::Relaxed);
        self.publish_failures.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
        self.commands.store(0, Ordering::Relaxed);
        self.last_interval_us.store(0, Ordering::Relaxed);
    }
}

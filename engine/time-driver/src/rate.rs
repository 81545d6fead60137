//! Rate controller: tick counters, pause target and real-time pacing ratio

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::{TickIndex, MAX_SPEED_FACTOR};

/// Tick index at or after which the clock is held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseTarget {
    /// Never pause
    Unbounded,
    /// Hold once the tick index reaches this value
    At(TickIndex),
}

/// Pause state reported in a [`ClockStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PauseStatus {
    #[default]
    Playing,
    /// Running, with a pause target still ahead
    Pausing { target: TickIndex },
    Paused,
}

/// Settings a [`RateController`] is built from
#[derive(Debug, Clone, PartialEq)]
pub struct RateSettings {
    pub sim_micros_per_tick: u64,
    pub real_micros_per_tick: u64,
    /// Seconds added to the simulated elapsed time to get absolute time
    pub absolute_start_time: f64,
    pub initial_tick: TickIndex,
}

/// Snapshot of the clock, as seen by presenters and remote observers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockStatus {
    pub tick_index: TickIndex,
    pub display_tick_index: u64,
    pub pause: PauseStatus,
    pub sim_micros_per_tick: u64,
    pub real_micros_per_tick: u64,
    /// Absolute simulated time in seconds
    pub absolute_time: f64,
    pub requested_speed_up: f64,
    /// Speed-up measured from the last observed tick interval
    pub actual_speed_up: Option<f64>,
}

/// Owns the clock's counters and pacing parameters.
///
/// Pure state plus transition rules; it never touches I/O and never reads a clock itself.
#[derive(Debug, Clone)]
pub struct RateController {
    tick_index: TickIndex,
    display_tick_index: u64,
    pause_at: PauseTarget,
    sim_micros_per_tick: u64,
    real_micros_per_tick: u64,
    absolute_start_time: f64,
    last_interval: Option<Duration>,
}

impl RateController {
    /// Create a rate controller, clamping the real rate into the allowed band
    pub fn new(settings: RateSettings) -> Result<Self, ConfigError> {
        if settings.sim_micros_per_tick == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sim-microseconds-per-tick",
                reason: "must be greater than zero".to_string(),
            });
        }
        if settings.real_micros_per_tick == 0 {
            return Err(ConfigError::InvalidValue {
                field: "real-microseconds-per-tick",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !settings.absolute_start_time.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "absolute-start-time",
                reason: "must be a finite number of seconds".to_string(),
            });
        }

        let (min, max) = rate_bounds(settings.sim_micros_per_tick);
        let real = settings.real_micros_per_tick.clamp(min, max);
        if real != settings.real_micros_per_tick {
            tracing::warn!(
                requested = settings.real_micros_per_tick,
                clamped = real,
                "Real microseconds per tick outside of [{}, {}], clamping",
                min,
                max
            );
        }

        Ok(Self {
            tick_index: settings.initial_tick,
            display_tick_index: 0,
            pause_at: PauseTarget::Unbounded,
            sim_micros_per_tick: settings.sim_micros_per_tick,
            real_micros_per_tick: real,
            absolute_start_time: settings.absolute_start_time,
            last_interval: None,
        })
    }

    /// Run one scheduler iteration.
    ///
    /// Returns the tick index that fired, or `None` while paused. The display counter moves
    /// either way. The tick index holds at `u64::MAX`.
    pub fn advance(&mut self) -> Option<TickIndex> {
        self.display_tick_index = self.display_tick_index.wrapping_add(1);
        if self.is_paused() {
            return None;
        }
        let fired = self.tick_index;
        self.tick_index = fired.checked_add(1)?;
        Some(fired)
    }

    /// Hold at the current tick index
    pub fn pause(&mut self) {
        if !self.is_paused() {
            self.pause_at = PauseTarget::At(self.tick_index);
        }
    }

    pub fn unpause(&mut self) {
        self.pause_at = PauseTarget::Unbounded;
    }

    /// Pause when unbounded, otherwise unpause. Returns true if the clock is now pausing.
    pub fn toggle(&mut self) -> bool {
        match self.pause_at {
            PauseTarget::Unbounded => {
                self.pause();
                true
            }
            PauseTarget::At(_) => {
                self.unpause();
                false
            }
        }
    }

    /// Run for `seconds` of simulated time, then hold
    pub fn run_for(&mut self, seconds: f64) {
        let ticks = (seconds * 1_000_000.0 / self.sim_micros_per_tick as f64) as u64;
        self.pause_at = PauseTarget::At(self.tick_index.saturating_add(ticks));
    }

    /// Run until the absolute simulated time `time`, then hold.
    ///
    /// A target at or behind the current tick leaves the clock held where it is.
    pub fn run_until(&mut self, time: f64) {
        let target = ((time - self.absolute_start_time) * 1_000_000.0
            / self.sim_micros_per_tick as f64) as u64;
        self.pause_at = PauseTarget::At(target);
    }

    /// Halve the real delay per tick. Returns false at the clamp.
    pub fn speed_up(&mut self) -> bool {
        let (min, _) = rate_bounds(self.sim_micros_per_tick);
        self.set_real_micros_per_tick((self.real_micros_per_tick / 2).max(min))
    }

    /// Double the real delay per tick. Returns false at the clamp.
    pub fn slow_down(&mut self) -> bool {
        let (_, max) = rate_bounds(self.sim_micros_per_tick);
        self.set_real_micros_per_tick(self.real_micros_per_tick.saturating_mul(2).min(max))
    }

    fn set_real_micros_per_tick(&mut self, next: u64) -> bool {
        if next == self.real_micros_per_tick {
            return false;
        }
        self.real_micros_per_tick = next;
        true
    }

    /// Record the wall-clock gap observed before the last fired tick
    pub fn record_interval(&mut self, interval: Duration) {
        self.last_interval = Some(interval);
    }

    /// True once the tick index has reached the pause target
    pub fn is_paused(&self) -> bool {
        match self.pause_at {
            PauseTarget::Unbounded => false,
            PauseTarget::At(target) => self.tick_index >= target,
        }
    }

    /// Whether the console should be refreshed on this iteration.
    ///
    /// Refreshes about every tenth of a second of wall-clock pacing, or every iteration when
    /// ticks are slower than that.
    pub fn display_due(&self) -> bool {
        let every = (100_000 / self.real_micros_per_tick).max(1);
        self.display_tick_index % every == 0
    }

    pub fn tick_index(&self) -> TickIndex {
        self.tick_index
    }

    pub fn display_tick_index(&self) -> u64 {
        self.display_tick_index
    }

    pub fn pause_target(&self) -> PauseTarget {
        self.pause_at
    }

    pub fn sim_micros_per_tick(&self) -> u64 {
        self.sim_micros_per_tick
    }

    pub fn real_micros_per_tick(&self) -> u64 {
        self.real_micros_per_tick
    }

    /// Wall-clock duration the scheduler waits between ticks
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(self.real_micros_per_tick)
    }

    pub fn last_interval(&self) -> Option<Duration> {
        self.last_interval
    }

    /// Absolute simulated time of the current tick, in seconds
    pub fn absolute_time(&self) -> f64 {
        self.absolute_start_time
            + (self.tick_index as f64 * self.sim_micros_per_tick as f64) / 1_000_000.0
    }

    pub fn requested_speed_up(&self) -> f64 {
        self.sim_micros_per_tick as f64 / self.real_micros_per_tick as f64
    }

    pub fn actual_speed_up(&self) -> Option<f64> {
        let micros = self.last_interval?.as_nanos() as f64 / 1_000.0;
        if micros > 0.0 {
            Some(self.sim_micros_per_tick as f64 / micros)
        } else {
            None
        }
    }

    pub fn pause_status(&self) -> PauseStatus {
        match self.pause_at {
            PauseTarget::Unbounded => PauseStatus::Playing,
            PauseTarget::At(target) if self.tick_index < target => PauseStatus::Pausing { target },
            PauseTarget::At(_) => PauseStatus::Paused,
        }
    }

    pub fn status(&self) -> ClockStatus {
        ClockStatus {
            tick_index: self.tick_index,
            display_tick_index: self.display_tick_index,
            pause: self.pause_status(),
            sim_micros_per_tick: self.sim_micros_per_tick,
            real_micros_per_tick: self.real_micros_per_tick,
            absolute_time: self.absolute_time(),
            requested_speed_up: self.requested_speed_up(),
            actual_speed_up: self.actual_speed_up(),
        }
    }
}

/// Closed interval of allowed real microseconds per tick for a simulated tick length
pub fn rate_bounds(sim_micros_per_tick: u64) -> (u64, u64) {
    let min = sim_micros_per_tick.div_ceil(MAX_SPEED_FACTOR).max(1);
    let max = sim_micros_per_tick.saturating_mul(MAX_SPEED_FACTOR);
    (min, max)
}

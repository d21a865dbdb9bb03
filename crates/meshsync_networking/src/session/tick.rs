//! # Heartbeat Tick Loop
//!
//! Fixed-timestep controller for driving [`Session::update`] from wall-clock
//! time.
//!
//! ## Design
//!
//! The caller supplies `now`, so the loop works the same under a real clock,
//! a game's frame timer or a test's fake clock. Long stalls are capped
//! instead of replayed as a burst of heartbeats.
//!
//! [`Session::update`]: super::Session::update

use std::time::{Duration, Instant};

/// Most ticks one [`TickLoop::advance`] call will report.
const MAX_CATCH_UP_TICKS: u32 = 8;

/// Fixed-timestep tick loop controller.
#[derive(Clone, Debug)]
pub struct TickLoop {
    /// Target tick duration.
    tick_duration: Duration,
    /// Time of last advance.
    last_tick: Option<Instant>,
    /// Accumulated time not yet ticked.
    accumulator: Duration,
    /// Total ticks reported.
    tick_count: u64,
    /// Ticks dropped after stalls.
    skipped_ticks: u64,
}

impl TickLoop {
    /// Creates a tick loop with the given period.
    #[must_use]
    pub fn new(tick_duration: Duration) -> Self {
        Self {
            tick_duration,
            last_tick: None,
            accumulator: Duration::ZERO,
            tick_count: 0,
            skipped_ticks: 0,
        }
    }

    /// Creates a tick loop whose period is `secs` seconds.
    ///
    /// Non-positive or non-finite periods fall back to one millisecond.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        let duration =
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_millis(1));
        Self::new(duration.max(Duration::from_millis(1)))
    }

    /// Accounts for time up to `now` and returns how many ticks are due.
    ///
    /// The first call only starts the clock.
    pub fn advance(&mut self, now: Instant) -> u32 {
        let Some(last) = self.last_tick.replace(now) else {
            return 0;
        };
        self.accumulator += now.saturating_duration_since(last);

        let mut due = 0;
        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            due += 1;
            if due == MAX_CATCH_UP_TICKS {
                let dropped = self.accumulator.as_nanos() / self.tick_duration.as_nanos();
                self.skipped_ticks += u64::try_from(dropped).unwrap_or(u64::MAX);
                self.accumulator = Duration::ZERO;
                break;
            }
        }

        self.tick_count += u64::from(due);
        due
    }

    /// Returns the current tick count.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Ticks dropped after stalls.
    #[must_use]
    pub const fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks
    }

    /// Returns the target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}

//! Virtual pacing clock for the mixing thread
//!
//! Every tick advances the clock by exactly one output period and the thread
//! sleeps until real time catches up. If the thread falls more than
//! `max_lag_periods` behind (debugger, overloaded host) the clock re-anchors
//! to the present instead of bursting to catch up.

use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PacingClock {
    period: Duration,
    max_lag: Duration,
    next_deadline: Option<Instant>,
    ticks: u64,
    reanchors: u64,
}

impl PacingClock {
    pub fn new(period: Duration, max_lag_periods: u32) -> Self {
        Self {
            period,
            max_lag: period * max_lag_periods.max(1),
            next_deadline: None,
            ticks: 0,
            reanchors: 0,
        }
    }

    /// Clock for `period_frames` frames at `sample_rate`
    pub fn for_period(period_frames: usize, sample_rate: u32, max_lag_periods: u32) -> Self {
        let nanos = if sample_rate == 0 {
            0
        } else {
            period_frames as u64 * 1_000_000_000 / sample_rate as u64
        };
        Self::new(Duration::from_nanos(nanos), max_lag_periods)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn reanchors(&self) -> u64 {
        self.reanchors
    }

    /// Advance one period and return how long to sleep from `now`
    pub fn advance(&mut self, now: Instant) -> Duration {
        self.ticks += 1;
        let mut deadline = match self.next_deadline {
            Some(previous) => previous + self.period,
            None => now + self.period,
        };

        if now > deadline + self.max_lag {
            debug!(
                "Pacing clock {:?} behind, re-anchoring",
                now.duration_since(deadline)
            );
            deadline = now + self.period;
            self.reanchors += 1;
        }

        self.next_deadline = Some(deadline);
        deadline.saturating_duration_since(now)
    }

    /// Forget the anchor; the next tick starts a fresh timeline
    pub fn reset(&mut self) {
        self.next_deadline = None;
    }

    /// Advance and sleep the calling thread until the new deadline
    pub fn sleep_tick(&mut self) {
        let wait = self.advance(Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

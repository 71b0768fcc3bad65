//! Speed and time-remaining estimation
//!
//! Each refresh tick turns the byte counter into an instantaneous rate.
//! The last few rates are averaged into a smoothed rate, which drives the
//! time-remaining projection.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rates derived from one sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeedSample {
    /// Bytes/sec since the previous sample
    pub current: u64,
    /// Mean of the retained samples
    pub smoothed: u64,
}

/// Sliding-window throughput estimator
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    history: VecDeque<u64>,
    capacity: usize,
    last_bytes: u64,
    last_time: Option<Instant>,
    latest: SpeedSample,
}

impl SpeedEstimator {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            last_bytes: 0,
            last_time: None,
            latest: SpeedSample::default(),
        }
    }

    /// Drop the history and take `downloaded` at `now` as the new baseline
    pub fn reset(&mut self, downloaded: u64, now: Instant) {
        self.history.clear();
        self.latest = SpeedSample::default();
        self.last_bytes = downloaded;
        self.last_time = Some(now);
    }

    /// Record the byte counter observed at `now`
    pub fn sample(&mut self, downloaded: u64, now: Instant) -> SpeedSample {
        let interval = self
            .last_time
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(Duration::ZERO);
        let secs = interval.as_secs_f64();

        // The counter can move backwards when a transfer restarts from zero
        let current = if secs > 0.0 {
            (downloaded.saturating_sub(self.last_bytes) as f64 / secs).floor() as u64
        } else {
            0
        };

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(current);

        let smoothed = self.history.iter().sum::<u64>() / self.history.len() as u64;

        self.last_bytes = downloaded;
        self.last_time = Some(now);
        self.latest = SpeedSample { current, smoothed };
        self.latest
    }

    pub fn latest(&self) -> SpeedSample {
        self.latest
    }

    /// Whole seconds until `total` is reached at the smoothed rate.
    /// `None` when the rate or the total is unknown.
    pub fn time_left(&self, total: Option<u64>, downloaded: u64) -> Option<u64> {
        let total = total?;
        if self.latest.smoothed == 0 {
            return None;
        }
        Some(total.saturating_sub(downloaded) / self.latest.smoothed)
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new(fetchline_types::SPEED_HISTORY_LEN)
    }
}

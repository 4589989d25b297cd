//! Rolling window of tick durations

use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Fixed-size history of recent tick durations; the oldest sample is
/// overwritten once the window is full.
pub struct TickTimings {
    ring: HeapRb<Duration>,
}

impl TickTimings {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.ring.push_overwrite(elapsed);
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn average(&self) -> Duration {
        let n = self.len();
        if n == 0 {
            return Duration::ZERO;
        }
        self.ring.iter().sum::<Duration>() / n as u32
    }

    /// Nearest-rank percentile, `p` in [0, 100].
    pub fn percentile(&self, p: f64) -> Duration {
        let mut sorted: Vec<Duration> = self.ring.iter().copied().collect();
        if sorted.is_empty() {
            return Duration::ZERO;
        }
        sorted.sort_unstable();
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }
}

//! Adaptive probe timeouts from observed round-trip times
//!
//! RFC 6298 smoothing: SRTT and RTTVAR are exponential moving averages,
//! the timeout is `SRTT + 4 * RTTVAR` clamped to a LAN-sized window.

use parking_lot::Mutex;
use std::time::Duration;

const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;
const K: f64 = 4.0;

#[derive(Debug, Default)]
struct Estimate {
    samples: usize,
    srtt_ms: f64,
    rttvar_ms: f64,
}

#[derive(Debug)]
pub struct RttTracker {
    estimate: Mutex<Estimate>,
    min_samples: usize,
    min_timeout: Duration,
    max_timeout: Duration,
}

impl RttTracker {
    pub fn new() -> Self {
        Self::with_bounds(3, Duration::from_millis(100), Duration::from_millis(1000))
    }

    pub fn with_bounds(min_samples: usize, min_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            estimate: Mutex::new(Estimate::default()),
            min_samples,
            min_timeout,
            max_timeout,
        }
    }

    /// Record one successful measurement. Non-positive samples are ignored.
    pub fn record(&self, rtt: Duration) {
        let ms = rtt.as_secs_f64() * 1000.0;
        if ms <= 0.0 {
            return;
        }

        let mut est = self.estimate.lock();
        if est.samples == 0 {
            est.srtt_ms = ms;
            est.rttvar_ms = ms / 2.0;
        } else {
            est.rttvar_ms = (1.0 - BETA) * est.rttvar_ms + BETA * (est.srtt_ms - ms).abs();
            est.srtt_ms = (1.0 - ALPHA) * est.srtt_ms + ALPHA * ms;
        }
        est.samples += 1;
    }

    /// The adaptive timeout, or `base` until enough samples are in.
    pub fn timeout(&self, base: Duration) -> Duration {
        let est = self.estimate.lock();
        if est.samples < self.min_samples {
            return base;
        }
        let computed = Duration::from_secs_f64((est.srtt_ms + K * est.rttvar_ms) / 1000.0);
        computed.clamp(self.min_timeout, self.max_timeout)
    }

    pub fn sample_count(&self) -> usize {
        self.estimate.lock().samples
    }

    pub fn smoothed(&self) -> Option<Duration> {
        let est = self.estimate.lock();
        (est.samples > 0).then(|| Duration::from_secs_f64(est.srtt_ms / 1000.0))
    }
}

impl Default for RttTracker {
    fn default() -> Self {
        Self::new()
    }
}

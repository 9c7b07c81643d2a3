use std::time::{Duration, Instant};

/// Default minimum interval between speed samples.
const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Transfer speed from server-confirmed byte totals.
///
/// A sample is taken at most once per interval; speed is `Δbytes/Δtime`
/// between the last two accepted samples, so a burst of small
/// acknowledgments does not produce a jittery reading.
#[derive(Debug)]
pub struct SpeedTracker {
    min_interval: Duration,
    last: Option<(Instant, u64)>,
    bytes_per_sec: f64,
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL)
    }
}

impl SpeedTracker {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
            bytes_per_sec: 0.0,
        }
    }

    /// Records the current confirmed byte total.
    pub fn record(&mut self, total_bytes: u64) {
        self.record_at(Instant::now(), total_bytes);
    }

    fn record_at(&mut self, now: Instant, total_bytes: u64) {
        match self.last {
            None => self.last = Some((now, total_bytes)),
            Some((prev_at, prev_bytes)) => {
                let elapsed = now.saturating_duration_since(prev_at);
                if elapsed >= self.min_interval {
                    let delta = total_bytes.saturating_sub(prev_bytes);
                    self.bytes_per_sec = delta as f64 / elapsed.as_secs_f64();
                    self.last = Some((now, total_bytes));
                }
            }
        }
    }

    /// Smoothed speed in bytes/second (0.0 until two samples exist).
    pub fn bytes_per_sec(&self) -> f64 {
        self.bytes_per_sec
    }

    /// Seconds remaining for `remaining_bytes`, `None` at zero speed.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        if self.bytes_per_sec <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            remaining_bytes as f64 / self.bytes_per_sec,
        ))
    }

    /// Clears speed state, e.g. on pause.
    pub fn reset(&mut self) {
        self.last = None;
        self.bytes_per_sec = 0.0;
    }
}

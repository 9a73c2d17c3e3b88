// ============================================
// TIMING UTILITY
// ============================================
// Usage:
//   let timer = Timer::start_with_threshold("cycle", 2_000);
//   ...
//   let took = timer.stop();
// A timer dropped without `stop()` logs on drop.
// ============================================

use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct Timer {
    name: String,
    start: Instant,
    threshold_ms: u128,
    reported: bool,
}

impl Timer {
    pub fn start(name: impl Into<String>) -> Self {
        Self::start_with_threshold(name, u128::MAX)
    }

    /// Logs at warn level when the measured span exceeds `threshold_ms`, debug otherwise.
    pub fn start_with_threshold(name: impl Into<String>, threshold_ms: u128) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
            threshold_ms,
            reported: false,
        }
    }

    pub fn stop(mut self) -> Duration {
        let duration = self.start.elapsed();
        self.report(duration);
        duration
    }

    fn report(&mut self, duration: Duration) {
        if self.reported {
            return;
        }
        self.reported = true;

        let ms = duration.as_millis();
        if ms > self.threshold_ms {
            warn!(timer = %self.name, elapsed_ms = ms as u64, threshold_ms = self.threshold_ms as u64, "slow operation");
        } else {
            debug!(timer = %self.name, elapsed_ms = ms as u64, "timing");
        }
    }

    pub async fn measure_async<F, Fut, R>(name: impl Into<String>, threshold_ms: u128, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        let timer = Self::start_with_threshold(name, threshold_ms);
        let result = f().await;
        timer.stop();
        result
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.report(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_returns_elapsed() {
        let timer = Timer::start("test");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.stop() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn measure_async_passes_result_through() {
        let value = Timer::measure_async("answer", 1_000, || async { 42 }).await;
        assert_eq!(value, 42);
    }
}

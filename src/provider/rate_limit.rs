use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Process-wide spacing between outbound provider calls.
///
/// Callers queue on the mutex and each one sleeps until the interval since the
/// previous call has elapsed, so calls are serialized at most `rps` per second.
/// Fairness between waiting callers is whatever the tokio mutex gives.
pub struct RateLimiter {
    interval_micros: AtomicU64,
    last_request: Mutex<Option<Instant>>,
}

fn interval_for(rps: f64) -> u64 {
    if rps.is_finite() && rps > 0.0 {
        (1_000_000.0 / rps) as u64
    } else {
        0
    }
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            interval_micros: AtomicU64::new(interval_for(requests_per_second)),
            last_request: Mutex::new(None),
        }
    }

    pub fn set_rate(&self, requests_per_second: f64) {
        self.interval_micros
            .store(interval_for(requests_per_second), Ordering::Relaxed);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_micros.load(Ordering::Relaxed))
    }

    /// Waits for this caller's slot.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let interval = self.interval();
            let elapsed = previous.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

//! Per-class claim rate limiting.

use std::time::Duration;

use tokio::time::Instant;

// Token bucket: refills `rate` tokens per second, holds at most `rate`.
#[derive(Debug)]
pub struct RateLimiter {
    rate: u32,
    tokens: f64,
    last_update: Instant,
}

impl RateLimiter {
    pub fn new(rate: u32) -> Self {
        let rate = rate.max(1);
        Self {
            rate,
            tokens: rate as f64,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate as f64).min(self.rate as f64);
        self.last_update = now;
    }

    /// Take one token, or report how long until one is available
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.rate as f64))
        }
    }
}

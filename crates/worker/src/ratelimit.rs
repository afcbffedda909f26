//! Per-process token bucket for upstream API calls.
//!
//! One bucket is shared by the pull and security workers targeting the same
//! upstream. Scope is deliberately per-process, not per-customer:
//! credential-level throttling is delegated to the upstream's 429 responses.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Bucket capacity: a single burst slot, matching a strict request pacer.
const BURST: f64 = 1.0;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter. `rate` is permits per second.
pub struct RateLimiter {
    rate: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// `rate` must be positive.
    pub fn new(rate: f64) -> Self {
        assert!(rate > 0.0, "rate must be positive");
        Self {
            rate,
            state: Mutex::new(BucketState {
                tokens: BURST,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available, then consume it.
    pub async fn wait(&self) {
        loop {
            let wait_for = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(BURST);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                // Lock is released before sleeping.
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };
            tokio::time::sleep(wait_for).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_request_passes_immediately() {
        let limiter = RateLimiter::new(1.0);
        let before = Instant::now();
        limiter.wait().await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_waits_for_refill() {
        let limiter = RateLimiter::new(2.0); // one token every 500ms

        limiter.wait().await;
        let start = Instant::now();
        limiter.wait().await;
        let waited = Instant::now().duration_since(start);

        assert!(waited >= Duration::from_millis(490), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(600), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_refills_at_most_one_burst() {
        let limiter = RateLimiter::new(10.0);
        limiter.wait().await;

        // A long idle period must not bank more than one burst token.
        tokio::time::sleep(Duration::from_secs(60)).await;

        let start = Instant::now();
        limiter.wait().await; // banked token
        limiter.wait().await; // must wait ~100ms
        let waited = Instant::now().duration_since(start);
        assert!(waited >= Duration::from_millis(90), "waited {waited:?}");
    }
}

//! Global outbound pacing shared by every delivery attempt.

use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter, clock};
use std::num::NonZeroU32;

/// Spaces attempts at least `1s / per_second` apart, with no burst allowance.
pub struct SendLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, clock::DefaultClock>,
    per_second: NonZeroU32,
}

impl SendLimiter {
    pub fn per_second(per_second: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(quota),
            per_second,
        }
    }

    /// Wait until the next attempt is allowed.
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    pub fn rate(&self) -> u32 {
        self.per_second.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_attempts_are_spaced() {
        let limiter = SendLimiter::per_second(20);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait().await;
        }
        // first attempt is immediate, the next four wait ~50ms each
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn test_shared_across_tasks() {
        let limiter = std::sync::Arc::new(SendLimiter::per_second(50));
        let start = Instant::now();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.wait().await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        // one immediate, three spaced by 20ms
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn test_zero_rate_clamped() {
        assert_eq!(SendLimiter::per_second(0).rate(), 1);
    }
}

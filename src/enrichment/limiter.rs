use std::time::{Duration, Instant};

use parking_lot::Mutex;

const POLL_STEP: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every enrichment caller.
///
/// Capacity equals the per-minute budget; tokens refill continuously at
/// `capacity / 60` per second. Callers that find it empty defer their work.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn per_minute(calls: u32) -> Self {
        Self::per_minute_at(calls, Instant::now())
    }

    pub fn per_minute_at(calls: u32, now: Instant) -> Self {
        let capacity = f64::from(calls.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_n_at(1, Instant::now())
    }

    pub fn try_acquire_n(&self, n: u32) -> bool {
        self.try_acquire_n_at(n, Instant::now())
    }

    /// Take `n` tokens at `now` if all are available; takes nothing otherwise.
    pub fn try_acquire_n_at(&self, n: u32, now: Instant) -> bool {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);
        let needed = f64::from(n);
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Wait up to `max_wait` for `n` tokens.
    pub async fn acquire_within(&self, n: u32, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.try_acquire_n(n) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
        }
    }

    pub fn available_at(&self, now: Instant) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed.is_zero() {
            return;
        }
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausts_at_capacity() {
        let start = Instant::now();
        let limiter = RateLimiter::per_minute_at(3, start);
        assert!(limiter.try_acquire_n_at(1, start));
        assert!(limiter.try_acquire_n_at(1, start));
        assert!(limiter.try_acquire_n_at(1, start));
        assert!(!limiter.try_acquire_n_at(1, start));
    }

    #[test]
    fn test_refills_over_time() {
        let start = Instant::now();
        let limiter = RateLimiter::per_minute_at(60, start);
        assert!(limiter.try_acquire_n_at(60, start));
        assert!(!limiter.try_acquire_n_at(1, start));

        // 60/min = 1 per second.
        let later = start + Duration::from_secs(2);
        assert!(limiter.try_acquire_n_at(2, later));
        assert!(!limiter.try_acquire_n_at(1, later));
    }

    #[test]
    fn test_multi_token_request_is_all_or_nothing() {
        let start = Instant::now();
        let limiter = RateLimiter::per_minute_at(2, start);
        assert!(!limiter.try_acquire_n_at(3, start));
        assert_eq!(limiter.available_at(start), 2.0);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let start = Instant::now();
        let limiter = RateLimiter::per_minute_at(5, start);
        let much_later = start + Duration::from_secs(3600);
        assert_eq!(limiter.available_at(much_later), 5.0);
    }

    #[tokio::test]
    async fn test_acquire_within_gives_up() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.try_acquire());
        assert!(!limiter.acquire_within(1, Duration::from_millis(60)).await);
    }
}

//! Global token bucket bounding aggregate outbound binlog bytes

use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct BucketState {
    /// May go negative after an oversized acquire; future callers pay it back
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter keyed by bytes per second.
///
/// `acquire` blocks the calling worker until the requested bytes fit the
/// budget; burst capacity is one second's worth of tokens.
pub struct RateLimiter {
    bytes_per_sec: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter allowing `bytes_per_sec` sustained throughput
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec.max(1) as f64;
        Self {
            bytes_per_sec: rate,
            capacity: rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.bytes_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Consume `bytes` tokens without blocking; false when over budget
    pub fn try_acquire(&self, bytes: u64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        let need = bytes as f64;
        if state.tokens >= need.min(self.capacity) {
            state.tokens -= need;
            true
        } else {
            false
        }
    }

    /// Consume `bytes` tokens, sleeping until the budget allows it.
    ///
    /// Requests larger than the burst capacity are admitted once the bucket
    /// is full and drive the balance negative, which delays later callers by
    /// the equivalent amount.
    pub fn acquire(&self, bytes: u64) {
        let need = bytes as f64;
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                let gate = need.min(self.capacity);
                if state.tokens >= gate {
                    state.tokens -= need;
                    return;
                }
                let deficit = gate - state.tokens;
                Duration::from_secs_f64(deficit / self.bytes_per_sec)
            };
            std::thread::sleep(wait.min(Duration::from_millis(100)));
        }
    }

    /// Configured sustained rate in bytes per second
    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_free() {
        let limiter = RateLimiter::new(1024 * 1024);
        let start = Instant::now();
        limiter.acquire(1024 * 1024);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_sustained_rate_enforced() {
        // 1 MiB/s: burst absorbs 1 MiB, the next 512 KiB must wait ~0.5 s
        let limiter = RateLimiter::new(1024 * 1024);
        let start = Instant::now();
        limiter.acquire(1024 * 1024);
        limiter.acquire(512 * 1024);
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[test]
    fn test_oversized_acquire_admitted() {
        // A single request above burst capacity must not deadlock
        let limiter = RateLimiter::new(64 * 1024);
        let start = Instant::now();
        limiter.acquire(128 * 1024);
        // admitted once the bucket is full; balance goes negative
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!limiter.try_acquire(1024));
    }

    #[test]
    fn test_try_acquire() {
        let limiter = RateLimiter::new(1000);
        assert!(limiter.try_acquire(500));
        assert!(limiter.try_acquire(500));
        assert!(!limiter.try_acquire(500));
    }
}

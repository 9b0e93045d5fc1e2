//! Token bucket for volume budgets.
//!
//! Tokens accumulate in whole units: each refill adds
//! `floor(elapsed / refill_interval × refill_rate)` tokens, capped at
//! `capacity`. The refill clock advances by exactly the time the added
//! tokens represent, so fractional progress carries over to the next refill.
//! Invariant: `0 <= tokens <= capacity`.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    /// Tokens added per `refill_interval`.
    refill_rate: f64,
    refill_interval: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: f64, refill_rate: f64, refill_interval: Duration) -> Self {
        Self::new_at(capacity, refill_rate, refill_interval, Instant::now())
    }

    pub fn new_at(
        capacity: f64,
        refill_rate: f64,
        refill_interval: Duration,
        now: Instant,
    ) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            tokens: capacity,
            refill_rate: refill_rate.max(0.0),
            refill_interval: refill_interval.max(Duration::from_millis(1)),
            last_refill: now,
        }
    }

    /// Take `n` tokens if available.
    pub fn try_consume(&mut self, n: f64) -> bool {
        self.try_consume_at(n, Instant::now())
    }

    pub fn try_consume_at(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Tokens available now.
    pub fn available(&mut self) -> f64 {
        self.refill(Instant::now());
        self.tokens
    }

    /// Whole tokens as of the last refill.
    pub fn whole_tokens(&self) -> u64 {
        self.tokens.floor() as u64
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Time until one token is available (zero when one already is).
    pub fn retry_after(&self) -> Duration {
        self.time_until(1.0)
    }

    /// Time until `n` tokens are available, ignoring the capacity bound.
    pub fn time_until(&self, n: f64) -> Duration {
        let missing = n - self.tokens;
        if missing <= 0.0 {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        self.refill_interval.mul_f64(missing / self.refill_rate)
    }

    /// Apply new limits, clamping the current balance.
    pub fn reconfigure(&mut self, capacity: f64, refill_rate: f64) {
        self.capacity = capacity.max(0.0);
        self.refill_rate = refill_rate.max(0.0);
        self.tokens = self.tokens.min(self.capacity);
    }

    fn refill(&mut self, now: Instant) {
        if self.refill_rate <= 0.0 {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = elapsed.as_secs_f64() / self.refill_interval.as_secs_f64();
        let to_add = (intervals * self.refill_rate).floor();
        if to_add < 1.0 {
            return;
        }

        if self.tokens + to_add >= self.capacity {
            self.tokens = self.capacity;
            self.last_refill = now;
        } else {
            self.tokens += to_add;
            self.last_refill += self.refill_interval.mul_f64(to_add / self.refill_rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn per_minute(capacity: f64) -> TokenBucket {
        TokenBucket::new(capacity, capacity / 60.0, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_negative() {
        let mut bucket = per_minute(10.0);
        assert!(bucket.try_consume(10.0));
        assert!(!bucket.try_consume(1.0));
        assert!(!bucket.try_consume(5.0));
        assert_eq!(bucket.available(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturates_at_capacity() {
        let mut bucket = per_minute(10.0);
        assert!(bucket.try_consume(10.0));
        advance(Duration::from_secs(120)).await;
        assert_eq!(bucket.available(), 10.0);
        assert!(!bucket.try_consume(11.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_whole_tokens_and_keeps_remainder() {
        // One token every 6 seconds.
        let mut bucket = per_minute(10.0);
        assert!(bucket.try_consume(10.0));

        advance(Duration::from_secs(5)).await;
        assert_eq!(bucket.available(), 0.0);

        advance(Duration::from_secs(4)).await;
        assert_eq!(bucket.available(), 1.0);

        // 9s elapsed, 6s consumed by the refill; the 3s remainder carries over.
        advance(Duration::from_secs(4)).await;
        assert_eq!(bucket.available(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after() {
        let mut bucket = per_minute(10.0);
        assert_eq!(bucket.retry_after(), Duration::ZERO);
        assert!(bucket.try_consume(10.0));
        assert_eq!(bucket.retry_after().as_secs(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_clamps_tokens() {
        let mut bucket = per_minute(10.0);
        bucket.reconfigure(3.0, 3.0 / 60.0);
        assert_eq!(bucket.available(), 3.0);
        assert_eq!(bucket.capacity(), 3.0);
    }
}

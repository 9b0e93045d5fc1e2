//! Admission control: fixed-window request counter plus token budget.
//!
//! # Data Flow
//! ```text
//! check_limit(key, units)
//!     → load live settings (ArcSwap snapshot)
//!     → evaluate(key, units, settings, now)
//!         no window or window expired? → fresh window, allow
//!         count >= max_requests? → deny until window end
//!         token budget short? → deny until enough tokens refill
//!         else count the hit and allow
//! ```
//!
//! Evaluation is a function of its inputs plus the per-key record, so
//! callers with derived settings (the adaptive limiter) never touch the
//! limiter's own configuration.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::LimitConfig;
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::security::cache::TtlCache;
use crate::security::token_bucket::TokenBucket;

/// Key of the account-wide limiter.
pub const GLOBAL_KEY: &str = "global";

/// Limits applied to one key.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSettings {
    pub window: Duration,
    pub max_requests: u32,
    /// Token budget per window; disabled when `None`.
    pub max_tokens: Option<u64>,
    pub refill_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self::from(&LimitConfig::default())
    }
}

impl From<&LimitConfig> for RateLimitSettings {
    fn from(config: &LimitConfig) -> Self {
        Self {
            window: Duration::from_millis(config.window_ms),
            max_requests: config.max_requests,
            max_tokens: config.max_tokens,
            refill_interval: Duration::from_millis(config.refill_interval_ms),
        }
    }
}

impl RateLimitSettings {
    /// Tokens added per refill interval: the full budget spread over the window.
    fn refill_rate(&self, max_tokens: u64) -> f64 {
        let window_secs = self.window.as_secs_f64();
        if window_secs <= 0.0 {
            return 0.0;
        }
        max_tokens as f64 / window_secs * self.refill_interval.as_secs_f64()
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u64,
    pub reset_at: Instant,
    pub total_hits: u32,
    /// Zero when allowed.
    pub retry_after: Duration,
}

impl RateLimitDecision {
    /// `Retry-After` value: whole seconds, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Unix time at which the current window resets.
    pub fn reset_epoch_secs(&self) -> u64 {
        let until = self.reset_at.saturating_duration_since(Instant::now());
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            + until;
        epoch.as_secs() + u64::from(epoch.subsec_nanos() > 0)
    }

    /// `<prefix>-Limit`, `<prefix>-Remaining` and `<prefix>-Reset` headers.
    pub fn headers(&self, prefix: &str) -> Vec<(String, String)> {
        vec![
            (format!("{prefix}-Limit"), self.limit.to_string()),
            (format!("{prefix}-Remaining"), self.remaining.to_string()),
            (format!("{prefix}-Reset"), self.reset_epoch_secs().to_string()),
        ]
    }

    pub fn to_error(&self, scope: &str) -> GatewayError {
        GatewayError::RateLimited {
            scope: scope.to_string(),
            limit: u64::from(self.limit),
            retry_after: self.retry_after,
        }
    }
}

/// Who is calling.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity {
    pub ip: Option<IpAddr>,
    pub user_id: Option<String>,
}

/// Derives the limiter key of a caller.
pub type KeyFn = Arc<dyn Fn(&RequestIdentity) -> String + Send + Sync>;

/// `"<ip>:<user>"`, with `unknown` and `anonymous` standing in for missing parts.
pub fn default_key(identity: &RequestIdentity) -> String {
    let ip = identity
        .ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user = identity.user_id.as_deref().unwrap_or("anonymous");
    format!("{ip}:{user}")
}

/// Key of a caller's budget for one provider.
pub fn provider_key(provider: &str, client_key: &str) -> String {
    format!("provider:{provider}:{client_key}")
}

#[derive(Debug, Clone)]
struct KeyState {
    window_start: Instant,
    request_count: u32,
    bucket: Option<TokenBucket>,
}

impl KeyState {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            request_count: 0,
            bucket: None,
        }
    }
}

/// Per-key fixed-window limiter with an optional token budget.
pub struct RateLimiter {
    scope: &'static str,
    settings: ArcSwap<RateLimitSettings>,
    records: TtlCache<String, KeyState>,
    key_fn: KeyFn,
}

impl RateLimiter {
    /// `scope` labels log events and metrics ("client", "global", "provider").
    pub fn new(
        scope: &'static str,
        settings: RateLimitSettings,
        ttl: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            scope,
            settings: ArcSwap::from_pointee(settings),
            records: TtlCache::new(ttl, max_entries),
            key_fn: Arc::new(default_key),
        }
    }

    /// Replace the key derivation.
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    pub fn scope(&self) -> &'static str {
        self.scope
    }

    pub fn key_for(&self, identity: &RequestIdentity) -> String {
        (self.key_fn)(identity)
    }

    pub fn settings(&self) -> Arc<RateLimitSettings> {
        self.settings.load_full()
    }

    /// Swap in new limits. In-flight checks finish against the old snapshot.
    pub fn update_settings(&self, settings: RateLimitSettings) {
        tracing::info!(
            scope = self.scope,
            max_requests = settings.max_requests,
            window_ms = settings.window.as_millis() as u64,
            max_tokens = ?settings.max_tokens,
            "Rate limit settings updated"
        );
        self.settings.store(Arc::new(settings));
    }

    /// Check and count one request costing `units` tokens.
    pub fn check_limit(&self, key: &str, units: u64) -> RateLimitDecision {
        let settings = self.settings.load();
        self.check_with(key, units, &settings)
    }

    /// Check against explicit settings instead of the live ones.
    pub fn check_with(
        &self,
        key: &str,
        units: u64,
        settings: &RateLimitSettings,
    ) -> RateLimitDecision {
        let now = Instant::now();
        let decision = self.records.with_entry(
            &key.to_string(),
            || KeyState::new(now),
            |state| evaluate(state, units, settings, now),
        );

        if !decision.allowed {
            tracing::warn!(
                scope = self.scope,
                key = %key,
                limit = decision.limit,
                retry_after_ms = decision.retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(self.scope);
        }
        decision
    }

    /// Forget a key's window and token budget.
    pub fn reset(&self, key: &str) {
        self.records.remove(&key.to_string());
    }

    pub fn purge_expired(&self) -> usize {
        self.records.purge_expired()
    }

    pub fn tracked_keys(&self) -> usize {
        self.records.len()
    }

    /// Purge expired records every `interval` until shutdown.
    pub async fn run_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = self.purge_expired();
                    if purged > 0 {
                        tracing::debug!(
                            scope = self.scope,
                            purged,
                            "Purged expired rate limit records"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!(scope = self.scope, "Rate limit sweeper stopping");
                    break;
                }
            }
        }
    }
}

fn evaluate(
    state: &mut KeyState,
    units: u64,
    settings: &RateLimitSettings,
    now: Instant,
) -> RateLimitDecision {
    let expired = now.saturating_duration_since(state.window_start) >= settings.window;
    if state.request_count == 0 || expired {
        state.window_start = now;
        state.request_count = 1;
        return RateLimitDecision {
            allowed: true,
            limit: settings.max_requests,
            remaining: u64::from(settings.max_requests.saturating_sub(1)),
            reset_at: window_end(now, settings.window),
            total_hits: 1,
            retry_after: Duration::ZERO,
        };
    }
    let reset_at = window_end(state.window_start, settings.window);

    if state.request_count >= settings.max_requests {
        return RateLimitDecision {
            allowed: false,
            limit: settings.max_requests,
            remaining: 0,
            reset_at,
            total_hits: state.request_count,
            retry_after: reset_at.saturating_duration_since(now),
        };
    }

    if let Some(max_tokens) = settings.max_tokens.filter(|_| units > 0) {
        // An empty budget never refills; hold the caller until the window ends.
        if max_tokens == 0 {
            return RateLimitDecision {
                allowed: false,
                limit: settings.max_requests,
                remaining: 0,
                reset_at,
                total_hits: state.request_count,
                retry_after: reset_at.saturating_duration_since(now),
            };
        }

        let rate = settings.refill_rate(max_tokens);
        let bucket = state.bucket.get_or_insert_with(|| {
            TokenBucket::new_at(max_tokens as f64, rate, settings.refill_interval, now)
        });
        bucket.reconfigure(max_tokens as f64, rate);

        if !bucket.try_consume_at(units as f64, now) {
            // Wait for all `units`, not just one token, capped at a full window.
            let retry_after = ceil_millis(bucket.time_until(units as f64)).min(settings.window);
            return RateLimitDecision {
                allowed: false,
                limit: settings.max_requests,
                remaining: bucket.whole_tokens(),
                reset_at: now.checked_add(retry_after).unwrap_or(reset_at),
                total_hits: state.request_count,
                retry_after,
            };
        }
    }

    state.request_count += 1;
    RateLimitDecision {
        allowed: true,
        limit: settings.max_requests,
        remaining: u64::from(settings.max_requests.saturating_sub(state.request_count)),
        reset_at,
        total_hits: state.request_count,
        retry_after: Duration::ZERO,
    }
}

fn window_end(start: Instant, window: Duration) -> Instant {
    start.checked_add(window).unwrap_or(start)
}

fn ceil_millis(duration: Duration) -> Duration {
    if duration == Duration::MAX {
        return duration;
    }
    let millis = duration.as_nanos().div_ceil(1_000_000);
    Duration::from_millis(millis.min(u128::from(u64::MAX)) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn limiter(max_requests: u32, max_tokens: Option<u64>) -> RateLimiter {
        RateLimiter::new(
            "client",
            RateLimitSettings {
                window: Duration::from_secs(60),
                max_requests,
                max_tokens,
                refill_interval: Duration::from_secs(1),
            },
            Duration::from_secs(600),
            1000,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_allows_up_to_max() {
        let limiter = limiter(60, None);
        let first = limiter.check_limit("k", 0);
        assert!(first.allowed);
        assert_eq!(first.remaining, 59);
        assert_eq!(first.total_hits, 1);

        for _ in 1..59 {
            assert!(limiter.check_limit("k", 0).allowed);
        }
        let sixtieth = limiter.check_limit("k", 0);
        assert!(sixtieth.allowed);
        assert_eq!(sixtieth.remaining, 0);

        let denied = limiter.check_limit("k", 0);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.total_hits, 60);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
        assert_eq!(denied.retry_after_secs(), 60);

        // Other keys are independent.
        assert!(limiter.check_limit("other", 0).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_boundary_starts_fresh_window() {
        let limiter = limiter(1, None);
        assert!(limiter.check_limit("k", 0).allowed);

        advance(Duration::from_millis(59_999)).await;
        let denied = limiter.check_limit("k", 0);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_millis(1));

        advance(Duration::from_millis(1)).await;
        let fresh = limiter.check_limit("k", 0);
        assert!(fresh.allowed);
        assert_eq!(fresh.total_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_budget_denies_and_reports_retry() {
        // 60 tokens per minute: one per second.
        let limiter = limiter(100, Some(60));
        assert!(limiter.check_limit("k", 1).allowed);
        assert!(limiter.check_limit("k", 50).allowed);

        let denied = limiter.check_limit("k", 20);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 10);
        assert_eq!(denied.total_hits, 2);
        assert_eq!(denied.retry_after, Duration::from_secs(10));

        advance(Duration::from_secs(10)).await;
        assert!(limiter.check_limit("k", 20).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_window_admits_without_token_check() {
        let limiter = limiter(100, Some(10));
        let first = limiter.check_limit("k", 50);
        assert!(first.allowed);
        assert_eq!(first.total_hits, 1);
        assert_eq!(first.remaining, 99);

        // The budget applies from the second request on.
        let second = limiter.check_limit("k", 50);
        assert!(!second.allowed);
        assert_eq!(second.remaining, 10);
        assert_eq!(second.total_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_token_cost_waits_at_most_one_window() {
        let limiter = limiter(100, Some(10));
        assert!(limiter.check_limit("k", 1).allowed);

        let denied = limiter.check_limit("k", 1_000);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_token_budget_denies_until_window_end() {
        let limiter = limiter(100, Some(0));
        assert!(limiter.check_limit("k", 1).allowed);

        advance(Duration::from_secs(15)).await;
        let denied = limiter.check_limit("k", 1);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Duration::from_secs(45));
        assert_eq!(denied.reset_at, Instant::now() + Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_units_skip_token_budget() {
        let limiter = limiter(10, Some(1));
        assert!(limiter.check_limit("k", 1).allowed);
        assert!(limiter.check_limit("k", 1).allowed);
        assert!(!limiter.check_limit("k", 1).allowed);
        assert!(limiter.check_limit("k", 0).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_key() {
        let limiter = limiter(1, Some(5));
        assert!(limiter.check_limit("k", 5).allowed);
        assert!(!limiter.check_limit("k", 1).allowed);

        limiter.reset("k");
        let decision = limiter.check_limit("k", 5);
        assert!(decision.allowed);
        assert_eq!(decision.total_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_swap_applies_to_next_check() {
        let limiter = limiter(1, None);
        assert!(limiter.check_limit("k", 0).allowed);
        assert!(!limiter.check_limit("k", 0).allowed);

        limiter.update_settings(RateLimitSettings {
            max_requests: 3,
            ..(*limiter.settings()).clone()
        });
        let decision = limiter.check_limit("k", 0);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_keys() {
        let identity = RequestIdentity {
            ip: Some("10.0.0.1".parse().unwrap()),
            user_id: Some("u42".into()),
        };
        assert_eq!(default_key(&identity), "10.0.0.1:u42");
        assert_eq!(default_key(&RequestIdentity::default()), "unknown:anonymous");
        assert_eq!(provider_key("openai", "10.0.0.1:u42"), "provider:openai:10.0.0.1:u42");

        let limiter = limiter(1, None).with_key_fn(Arc::new(|id: &RequestIdentity| {
            id.user_id.clone().unwrap_or_default()
        }));
        assert_eq!(limiter.key_for(&identity), "u42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_headers_rendering() {
        let limiter = limiter(5, None);
        let decision = limiter.check_limit("k", 0);
        let headers = decision.headers("X-RateLimit");
        assert_eq!(headers[0], ("X-RateLimit-Limit".to_string(), "5".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining".to_string(), "4".to_string()));
        assert_eq!(headers[2].0, "X-RateLimit-Reset");
        assert!(headers[2].1.parse::<u64>().unwrap() > 0);

        let err = decision.to_error("client");
        assert!(matches!(err, GatewayError::RateLimited { limit: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_records_purged() {
        let limiter = RateLimiter::new(
            "client",
            RateLimitSettings::default(),
            Duration::from_secs(10),
            100,
        );
        limiter.check_limit("a", 0);
        limiter.check_limit("b", 0);
        assert_eq!(limiter.tracked_keys(), 2);

        advance(Duration::from_secs(11)).await;
        assert_eq!(limiter.purge_expired(), 2);
        assert_eq!(limiter.tracked_keys(), 0);
    }
}

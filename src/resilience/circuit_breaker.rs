//! Circuit breaker for provider protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: target assumed down, calls fail fast without I/O
//! - Half-Open: a single trial call decides whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: volume threshold met AND (failures >= threshold OR error % >= limit)
//! Open → Half-Open: first call after next_attempt
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (next_attempt = now + timeout)
//! ```
//!
//! A success while closed only decrements the failure count by one.
//! Transition listeners run after the state lock is released.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{GatewayError, GatewayResult};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct BreakerOptions {
    /// Failures that open the breaker once `volume_threshold` is met.
    pub failure_threshold: u32,
    /// Minimum calls before the breaker may open.
    pub volume_threshold: u32,
    /// Failure percentage that opens the breaker.
    pub error_threshold_percentage: f64,
    /// Cooldown between opening and the trial call.
    pub timeout: Duration,
    /// Maximum age of response-time samples.
    pub monitoring_window: Duration,
    /// Hard cap on retained samples.
    pub max_samples: usize,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            volume_threshold: 10,
            error_threshold_percentage: 50.0,
            timeout: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(60),
            max_samples: 1000,
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerOptions {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            volume_threshold: config.volume_threshold,
            error_threshold_percentage: config.error_threshold_percentage,
            timeout: Duration::from_millis(config.timeout_ms),
            monitoring_window: Duration::from_millis(config.monitoring_window_ms),
            ..Default::default()
        }
    }
}

/// A state change, delivered to every [`TransitionListener`].
#[derive(Debug, Clone, Serialize)]
pub struct BreakerEvent {
    pub name: String,
    pub from: BreakerState,
    pub to: BreakerState,
    pub failure_count: u32,
    pub total_requests: u64,
}

/// Observer of breaker transitions.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, event: &BreakerEvent);
}

/// Counters and derived figures for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    /// Failures as a percentage of all recorded calls.
    pub error_rate: f64,
    pub average_response_time_ms: f64,
    pub sample_count: usize,
}

/// Provider-oriented view including the configured thresholds.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub last_failure_ms_ago: Option<u64>,
    pub next_attempt_in_ms: Option<u64>,
    pub failure_threshold: u32,
    pub volume_threshold: u32,
    pub error_threshold_percentage: f64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    duration: Duration,
    success: bool,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    total_requests: u64,
    samples: VecDeque<Sample>,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    trial_in_flight: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            samples: VecDeque::new(),
            last_failure: None,
            next_attempt: None,
            trial_in_flight: false,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A named breaker guarding calls to one upstream target.
pub struct CircuitBreaker {
    name: String,
    options: BreakerOptions,
    inner: Mutex<Inner>,
    listeners: Vec<Arc<dyn TransitionListener>>,
}

impl CircuitBreaker {
    /// Create a breaker without listeners.
    pub fn new(name: impl Into<String>, options: BreakerOptions) -> Self {
        Self::with_listeners(name, options, Vec::new())
    }

    /// Create a breaker that reports transitions to `listeners`.
    pub fn with_listeners(
        name: impl Into<String>,
        options: BreakerOptions,
        listeners: Vec<Arc<dyn TransitionListener>>,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            inner: Mutex::new(Inner::new()),
            listeners,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &BreakerOptions {
        &self.options
    }

    /// Run `operation` under breaker protection.
    ///
    /// Rejected calls return [`GatewayError::CircuitOpen`] and never invoke
    /// the operation. A call dropped before completion counts as a failure.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let trial = self.acquire()?;
        let mut guard = CallGuard {
            breaker: self,
            start: Instant::now(),
            trial,
            armed: true,
        };

        let result = operation().await;

        guard.armed = false;
        let elapsed = guard.start.elapsed();
        match &result {
            Ok(_) => self.on_success(elapsed, trial),
            Err(_) => self.on_failure(elapsed, trial),
        }
        result
    }

    /// Decide whether a call may proceed. `Ok(true)` marks a half-open trial.
    fn acquire(&self) -> GatewayResult<bool> {
        let now = Instant::now();
        let mut events = Vec::new();
        let decision = {
            let mut inner = self.lock();
            let state = inner.state;
            match state {
                BreakerState::Closed => Ok(false),
                BreakerState::Open => {
                    let next = inner.next_attempt.unwrap_or(now);
                    if now < next {
                        Err(GatewayError::CircuitOpen {
                            name: self.name.clone(),
                            retry_after: next - now,
                        })
                    } else {
                        self.transition(&mut inner, BreakerState::HalfOpen, &mut events);
                        inner.trial_in_flight = true;
                        Ok(true)
                    }
                }
                BreakerState::HalfOpen => {
                    if inner.trial_in_flight {
                        Err(GatewayError::CircuitOpen {
                            name: self.name.clone(),
                            retry_after: Duration::ZERO,
                        })
                    } else {
                        inner.trial_in_flight = true;
                        Ok(true)
                    }
                }
            }
        };
        self.emit(events);
        decision
    }

    fn on_success(&self, elapsed: Duration, trial: bool) {
        let now = Instant::now();
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            self.record_sample(&mut inner, now, elapsed, true);
            inner.total_requests += 1;
            inner.success_count += 1;
            if trial {
                inner.trial_in_flight = false;
            }

            let state = inner.state;
            match state {
                BreakerState::HalfOpen => {
                    self.transition(&mut inner, BreakerState::Closed, &mut events);
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt = None;
                }
                BreakerState::Closed => {
                    inner.failure_count = inner.failure_count.saturating_sub(1);
                }
                BreakerState::Open => {}
            }
        }
        self.emit(events);
    }

    fn on_failure(&self, elapsed: Duration, trial: bool) {
        let now = Instant::now();
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            self.record_sample(&mut inner, now, elapsed, false);
            inner.total_requests += 1;
            inner.failure_count += 1;
            inner.last_failure = Some(now);
            if trial {
                inner.trial_in_flight = false;
            }

            let state = inner.state;
            match state {
                BreakerState::HalfOpen => self.open(&mut inner, now, &mut events),
                BreakerState::Closed if self.should_open(&inner) => {
                    self.open(&mut inner, now, &mut events)
                }
                _ => {}
            }
        }
        self.emit(events);
    }

    fn should_open(&self, inner: &Inner) -> bool {
        if inner.total_requests < u64::from(self.options.volume_threshold) {
            return false;
        }
        let error_percentage = f64::from(inner.failure_count) / inner.total_requests as f64 * 100.0;
        inner.failure_count >= self.options.failure_threshold
            || error_percentage >= self.options.error_threshold_percentage
    }

    fn open(&self, inner: &mut Inner, now: Instant, events: &mut Vec<BreakerEvent>) {
        self.transition(inner, BreakerState::Open, events);
        inner.next_attempt = Some(now + self.options.timeout);
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, events: &mut Vec<BreakerEvent>) {
        if inner.state == to {
            return;
        }
        events.push(BreakerEvent {
            name: self.name.clone(),
            from: inner.state,
            to,
            failure_count: inner.failure_count,
            total_requests: inner.total_requests,
        });
        inner.state = to;
    }

    fn record_sample(&self, inner: &mut Inner, now: Instant, duration: Duration, success: bool) {
        inner.samples.push_back(Sample {
            at: now,
            duration,
            success,
        });
        inner.prune(now, self.options.monitoring_window);
        while inner.samples.len() > self.options.max_samples {
            inner.samples.pop_front();
        }
    }

    fn emit(&self, events: Vec<BreakerEvent>) {
        for event in &events {
            for listener in &self.listeners {
                listener.on_transition(event);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Operator controls ---

    /// Open the breaker now, regardless of counters.
    pub fn force_open(&self) {
        let now = Instant::now();
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            inner.trial_in_flight = false;
            self.open(&mut inner, now, &mut events);
        }
        self.emit(events);
    }

    /// Fully reset and close the breaker.
    pub fn force_closed(&self) {
        self.reset();
    }

    /// Clear every counter and sample; the breaker resumes closed.
    pub fn reset(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            self.transition(&mut inner, BreakerState::Closed, &mut events);
            *inner = Inner::new();
        }
        self.emit(events);
    }

    // --- Read API ---

    /// Current state without side effects.
    pub fn current_state(&self) -> BreakerState {
        self.lock().state
    }

    /// Whether a call issued now would be let through.
    pub fn allows_requests(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => inner.next_attempt.map_or(true, |next| Instant::now() >= next),
            BreakerState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Share of successful calls among the recent samples (1.0 when idle).
    pub fn success_rate(&self) -> f64 {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.prune(now, self.options.monitoring_window);
        if inner.samples.is_empty() {
            return 1.0;
        }
        let successes = inner.samples.iter().filter(|s| s.success).count();
        successes as f64 / inner.samples.len() as f64
    }

    pub fn stats(&self) -> BreakerStats {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.prune(now, self.options.monitoring_window);

        let error_rate = if inner.total_requests == 0 {
            0.0
        } else {
            f64::from(inner.failure_count) / inner.total_requests as f64 * 100.0
        };
        let average_response_time_ms = if inner.samples.is_empty() {
            0.0
        } else {
            let total: Duration = inner.samples.iter().map(|s| s.duration).sum();
            total.as_secs_f64() * 1000.0 / inner.samples.len() as f64
        };

        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            error_rate,
            average_response_time_ms,
            sample_count: inner.samples.len(),
        }
    }

    pub fn state(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            last_failure_ms_ago: inner
                .last_failure
                .map(|t| now.duration_since(t).as_millis() as u64),
            next_attempt_in_ms: inner
                .next_attempt
                .map(|t| t.saturating_duration_since(now).as_millis() as u64),
            failure_threshold: self.options.failure_threshold,
            volume_threshold: self.options.volume_threshold,
            error_threshold_percentage: self.options.error_threshold_percentage,
            timeout_ms: self.options.timeout.as_millis() as u64,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.current_state())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Records a failure if the guarded call is dropped before it completes.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    start: Instant,
    trial: bool,
    armed: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.on_failure(self.start.elapsed(), self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::oneshot;

    fn options(failure_threshold: u32, volume_threshold: u32) -> BreakerOptions {
        BreakerOptions {
            failure_threshold,
            volume_threshold,
            error_threshold_percentage: 100.0,
            timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    async fn fail(cb: &CircuitBreaker) -> GatewayResult<()> {
        cb.execute(|| async { Err(GatewayError::Transport("boom".into())) })
            .await
    }

    async fn succeed(cb: &CircuitBreaker) -> GatewayResult<()> {
        cb.execute(|| async { Ok(()) }).await
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(BreakerState, BreakerState)>>);

    impl TransitionListener for Recorder {
        fn on_transition(&self, event: &BreakerEvent) {
            self.0.lock().unwrap().push((event.from, event.to));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_closed_until_volume_threshold() {
        let cb = CircuitBreaker::new("p1", options(3, 5));

        for _ in 0..4 {
            let _ = fail(&cb).await;
            assert_eq!(cb.current_state(), BreakerState::Closed);
        }
        assert_eq!(cb.stats().failure_count, 4);

        let _ = fail(&cb).await;
        assert_eq!(cb.current_state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_volume_with_three_failures() {
        let cb = CircuitBreaker::new("p1", options(3, 5));

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.current_state(), BreakerState::Closed);
        let _ = fail(&cb).await;

        assert_eq!(cb.current_state(), BreakerState::Open);
        let snapshot = cb.state();
        assert_eq!(snapshot.total_requests, 5);
        assert_eq!(snapshot.next_attempt_in_ms, Some(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_percentage_opens() {
        let cb = CircuitBreaker::new(
            "p1",
            BreakerOptions {
                failure_threshold: 100,
                volume_threshold: 4,
                error_threshold_percentage: 50.0,
                ..Default::default()
            },
        );
        succeed(&cb).await.unwrap();
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.current_state(), BreakerState::Closed);
        // 3 failures of 4 calls = 75%
        let _ = fail(&cb).await;
        assert_eq!(cb.current_state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_never_invokes_operation() {
        let cb = CircuitBreaker::new("p1", options(1, 1));
        let _ = fail(&cb).await;
        assert_eq!(cb.current_state(), BreakerState::Open);

        let calls = AtomicU32::new(0);
        let result = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GatewayError>(())
            })
            .await;

        assert!(matches!(result, Err(GatewayError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.stats().total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes_and_resets() {
        let cb = CircuitBreaker::new("p1", options(2, 2));
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.current_state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.allows_requests());

        let seen = Mutex::new(None);
        cb.execute(|| async {
            *seen.lock().unwrap() = Some(cb.current_state());
            Ok::<_, GatewayError>(())
        })
        .await
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(BreakerState::HalfOpen));
        assert_eq!(cb.current_state(), BreakerState::Closed);
        let stats = cb.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
        assert_eq!(cb.state().next_attempt_in_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_new_deadline() {
        let cb = CircuitBreaker::new("p1", options(2, 2));
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;

        tokio::time::advance(Duration::from_secs(45)).await;
        let _ = fail(&cb).await;

        assert_eq!(cb.current_state(), BreakerState::Open);
        assert_eq!(cb.state().next_attempt_in_ms, Some(30_000));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(matches!(
            succeed(&cb).await,
            Err(GatewayError::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let cb = Arc::new(CircuitBreaker::new("p1", options(1, 1)));
        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let (tx, rx) = oneshot::channel::<()>();
        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .execute(|| async move {
                    let _ = rx.await;
                    Ok::<_, GatewayError>(())
                })
                .await
        });

        while cb.current_state() != BreakerState::HalfOpen {
            tokio::task::yield_now().await;
        }
        assert!(!cb.allows_requests());
        assert!(matches!(
            succeed(&cb).await,
            Err(GatewayError::CircuitOpen { .. })
        ));

        tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(cb.current_state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_success_decrements_by_one() {
        let cb = CircuitBreaker::new("p1", options(10, 100));
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        succeed(&cb).await.unwrap();
        assert_eq!(cb.stats().failure_count, 2);

        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_counts_as_failure() {
        let cb = CircuitBreaker::new("p1", options(10, 100));
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            cb.execute(|| std::future::pending::<GatewayResult<()>>()),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(cb.stats().failure_count, 1);
        assert_eq!(cb.stats().total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_controls() {
        let cb = CircuitBreaker::new("p1", options(3, 3));
        cb.force_open();
        assert_eq!(cb.current_state(), BreakerState::Open);
        assert!(!cb.allows_requests());

        cb.force_closed();
        assert_eq!(cb.current_state(), BreakerState::Closed);

        let _ = fail(&cb).await;
        cb.reset();
        let stats = cb.stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.sample_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_expire_with_monitoring_window() {
        let cb = CircuitBreaker::new(
            "p1",
            BreakerOptions {
                monitoring_window: Duration::from_secs(10),
                ..Default::default()
            },
        );
        let _ = fail(&cb).await;
        succeed(&cb).await.unwrap();
        assert_eq!(cb.stats().sample_count, 2);
        assert_eq!(cb.success_rate(), 0.5);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cb.stats().sample_count, 0);
        assert_eq!(cb.success_rate(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listeners_observe_full_cycle() {
        let recorder = Arc::new(Recorder::default());
        let cb = CircuitBreaker::with_listeners(
            "p1",
            options(1, 1),
            vec![recorder.clone() as Arc<dyn TransitionListener>],
        );

        let _ = fail(&cb).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        succeed(&cb).await.unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (BreakerState::Closed, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
                (BreakerState::HalfOpen, BreakerState::Closed),
            ]
        );
    }
}

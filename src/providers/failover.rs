//! Provider failover controller.
//!
//! # Responsibilities
//! - Own the registered providers and their request/health breakers
//! - Order candidates: current provider first, then ascending priority
//! - Walk candidates until one succeeds, recording failures as it goes
//! - Run health checks that readmit recovered providers
//!
//! # Data Flow
//! ```text
//! execute_with_failover(request)
//!     → available_providers() (drop failed, sticky + priority order)
//!     → for each: breaker.execute(transform_request → send → transform_response)
//!     → first success: switch current if needed, attach metadata
//!     → exhaustion: AllProvidersFailed { last }
//! ```
//!
//! Health checks and request failures both write `failed_providers`; the
//! last writer wins.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::{CircuitBreakerConfig, HealthCheckConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::health::state::{HealthSource, HealthStatus, ProviderHealth};
use crate::observability::metrics;
use crate::providers::adapter::{
    estimate_tokens, transform_request, transform_response, CompletionRequest,
    CompletionResponse, ProviderReply, ResponseMetadata,
};
use crate::providers::descriptor::ProviderDescriptor;
use crate::providers::transport::ProviderTransport;
use crate::resilience::{BreakerOptions, BreakerState, CircuitBreaker, CircuitBreakerRegistry};

/// Success rate under which a closed breaker reports a degraded provider.
const DEGRADED_SUCCESS_RATE: f64 = 0.9;

/// Breaker settings for provider traffic and health checks.
#[derive(Debug, Clone)]
pub struct FailoverOptions {
    pub request_breaker: BreakerOptions,
    pub health_breaker: BreakerOptions,
    pub health_timeout: Duration,
}

impl FailoverOptions {
    pub fn from_config(breaker: &CircuitBreakerConfig, health: &HealthCheckConfig) -> Self {
        Self {
            request_breaker: BreakerOptions::from(breaker),
            health_breaker: BreakerOptions {
                failure_threshold: health.failure_threshold,
                volume_threshold: health.failure_threshold,
                timeout: Duration::from_millis(health.breaker_timeout_ms),
                ..Default::default()
            },
            health_timeout: Duration::from_millis(health.timeout_ms),
        }
    }
}

impl Default for FailoverOptions {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default(), &HealthCheckConfig::default())
    }
}

/// Mutable routing state. `current_provider` always names a registered provider.
#[derive(Debug, Clone)]
pub struct FailoverState {
    pub current_provider: String,
    pub failed_providers: HashSet<String>,
    pub last_failover: Option<Instant>,
    pub total_failovers: u64,
}

/// Serializable view of [`FailoverState`].
#[derive(Debug, Clone, Serialize)]
pub struct FailoverStats {
    pub current_provider: String,
    /// Sorted by name.
    pub failed_providers: Vec<String>,
    pub last_failover_ms_ago: Option<u64>,
    pub total_failovers: u64,
}

/// Per-provider status for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub dialect: &'static str,
    pub priority: u32,
    pub cost_per_token: f64,
    pub is_current: bool,
    pub is_failed: bool,
    pub circuit_state: BreakerState,
    pub success_rate: f64,
    pub has_health_check: bool,
}

struct ProviderEntry {
    descriptor: Arc<ProviderDescriptor>,
    breaker: Arc<CircuitBreaker>,
    health_breaker: Option<Arc<CircuitBreaker>>,
}

/// Routes completion requests across providers.
pub struct FailoverManager {
    providers: Vec<ProviderEntry>,
    transport: Arc<dyn ProviderTransport>,
    state: Mutex<FailoverState>,
    health_timeout: Duration,
}

impl FailoverManager {
    /// Register `descriptors` and create their breakers in `registry`.
    ///
    /// Fails when no provider is given or a name is registered twice.
    pub fn new(
        descriptors: Vec<ProviderDescriptor>,
        registry: &CircuitBreakerRegistry,
        options: FailoverOptions,
        transport: Arc<dyn ProviderTransport>,
    ) -> GatewayResult<Self> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.name.as_str()) {
                return Err(GatewayError::Config(format!(
                    "duplicate provider name '{}'",
                    descriptor.name
                )));
            }
        }

        // Lowest priority wins; min_by_key keeps the first of equal keys.
        let current = descriptors
            .iter()
            .min_by_key(|d| d.priority)
            .map(|d| d.name.clone())
            .ok_or_else(|| GatewayError::Config("at least one provider is required".to_string()))?;

        let providers = descriptors
            .into_iter()
            .map(|descriptor| {
                let breaker = registry.get_or_create(
                    &format!("provider:{}", descriptor.name),
                    Some(options.request_breaker.clone()),
                );
                let health_breaker = descriptor.has_health_check().then(|| {
                    registry.get_or_create(
                        &format!("health:{}", descriptor.name),
                        Some(options.health_breaker.clone()),
                    )
                });
                tracing::info!(
                    provider = %descriptor.name,
                    model = %descriptor.model,
                    priority = descriptor.priority,
                    dialect = descriptor.dialect.as_str(),
                    "Registered provider"
                );
                ProviderEntry {
                    descriptor: Arc::new(descriptor),
                    breaker,
                    health_breaker,
                }
            })
            .collect();

        Ok(Self {
            providers,
            transport,
            state: Mutex::new(FailoverState {
                current_provider: current,
                failed_providers: HashSet::new(),
                last_failover: None,
                total_failovers: 0,
            }),
            health_timeout: options.health_timeout,
        })
    }

    fn lock(&self) -> MutexGuard<'_, FailoverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn candidates(&self) -> Vec<&ProviderEntry> {
        let state = self.lock();
        let mut candidates: Vec<_> = self
            .providers
            .iter()
            .filter(|p| !state.failed_providers.contains(&p.descriptor.name))
            .collect();
        candidates.sort_by_key(|p| {
            (p.descriptor.name != state.current_provider, p.descriptor.priority)
        });
        candidates
    }

    /// Providers not currently failed: the current one first, then by priority.
    pub fn available_providers(&self) -> Vec<Arc<ProviderDescriptor>> {
        self.candidates()
            .into_iter()
            .map(|p| p.descriptor.clone())
            .collect()
    }

    pub fn current_provider(&self) -> String {
        self.lock().current_provider.clone()
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter().map(|p| p.descriptor.as_ref())
    }

    /// Execute `request` against the first provider that succeeds.
    pub async fn execute_with_failover(
        &self,
        request: &CompletionRequest,
    ) -> GatewayResult<CompletionResponse> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            tracing::error!("No providers available");
            return Err(GatewayError::NoProvidersAvailable);
        }

        let mut attempts = 0;
        let mut last_error = None;

        for entry in candidates {
            attempts += 1;
            let descriptor = entry.descriptor.as_ref();
            let start = Instant::now();
            let result = entry
                .breaker
                .execute(|| self.call_provider(descriptor, request))
                .await;
            let elapsed = start.elapsed();

            match result {
                Ok(reply) => {
                    metrics::record_provider_call(&descriptor.name, true, elapsed.as_secs_f64());
                    self.record_success(descriptor);
                    return Ok(build_response(descriptor, request, reply, elapsed));
                }
                Err(err) => {
                    if !matches!(err, GatewayError::CircuitOpen { .. }) {
                        metrics::record_provider_call(
                            &descriptor.name,
                            false,
                            elapsed.as_secs_f64(),
                        );
                    }
                    self.record_failure(descriptor, &err);
                    last_error = Some(err);
                }
            }
        }

        let last = last_error.unwrap_or(GatewayError::NoProvidersAvailable);
        tracing::error!(attempts, error = %last, "All providers failed");
        Err(GatewayError::AllProvidersFailed {
            attempts,
            last: Box::new(last),
        })
    }

    async fn call_provider(
        &self,
        descriptor: &ProviderDescriptor,
        request: &CompletionRequest,
    ) -> GatewayResult<ProviderReply> {
        let body = transform_request(descriptor, request);
        let reply = self.transport.send(descriptor, body).await?;
        transform_response(descriptor, &reply)
    }

    fn record_success(&self, descriptor: &ProviderDescriptor) {
        let mut state = self.lock();
        if state.current_provider != descriptor.name {
            tracing::info!(
                from = %state.current_provider,
                to = %descriptor.name,
                "Switched current provider"
            );
            state.current_provider = descriptor.name.clone();
        }
    }

    fn record_failure(&self, descriptor: &ProviderDescriptor, error: &GatewayError) {
        let mut state = self.lock();
        state.failed_providers.insert(descriptor.name.clone());
        if state.current_provider == descriptor.name {
            state.total_failovers += 1;
            state.last_failover = Some(Instant::now());
            metrics::record_failover(&descriptor.name);
        }
        tracing::warn!(
            provider = %descriptor.name,
            error = %error,
            kind = error.kind(),
            "Provider attempt failed, trying next"
        );
    }

    /// Health-check every provider once.
    ///
    /// Providers with a health endpoint are checked through their health
    /// breaker. Providers without one are readmitted once their request
    /// breaker lets calls through again.
    pub async fn check_health(&self) {
        for entry in &self.providers {
            let descriptor = entry.descriptor.as_ref();
            let healthy = match &entry.health_breaker {
                Some(breaker) => {
                    let result = breaker
                        .execute(|| self.transport.health_check(descriptor, self.health_timeout))
                        .await;
                    if let Err(e) = &result {
                        tracing::warn!(
                            provider = %descriptor.name,
                            error = %e,
                            "Health check failed"
                        );
                    }
                    result.is_ok()
                }
                None => {
                    if !entry.breaker.allows_requests() {
                        continue;
                    }
                    true
                }
            };

            let mut state = self.lock();
            if healthy {
                if state.failed_providers.remove(&descriptor.name) {
                    tracing::info!(provider = %descriptor.name, "Provider recovered");
                }
            } else {
                state.failed_providers.insert(descriptor.name.clone());
            }
            drop(state);
            metrics::record_provider_health(&descriptor.name, healthy);
        }
    }

    /// Status of every provider, in registration order.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let (current, failed) = {
            let state = self.lock();
            (state.current_provider.clone(), state.failed_providers.clone())
        };
        self.providers
            .iter()
            .map(|p| ProviderStatus {
                name: p.descriptor.name.clone(),
                model: p.descriptor.model.clone(),
                dialect: p.descriptor.dialect.as_str(),
                priority: p.descriptor.priority,
                cost_per_token: p.descriptor.cost_per_token,
                is_current: p.descriptor.name == current,
                is_failed: failed.contains(&p.descriptor.name),
                circuit_state: p.breaker.current_state(),
                success_rate: p.breaker.success_rate(),
                has_health_check: p.health_breaker.is_some(),
            })
            .collect()
    }

    pub fn failover_stats(&self) -> FailoverStats {
        let state = self.lock();
        let mut failed: Vec<_> = state.failed_providers.iter().cloned().collect();
        failed.sort();
        FailoverStats {
            current_provider: state.current_provider.clone(),
            failed_providers: failed,
            last_failover_ms_ago: state
                .last_failover
                .map(|t| t.elapsed().as_millis() as u64),
            total_failovers: state.total_failovers,
        }
    }

    /// Health of every provider derived from breaker and failover state.
    pub fn health_snapshot(&self) -> HashMap<String, ProviderHealth> {
        let failed = self.lock().failed_providers.clone();
        self.providers
            .iter()
            .map(|p| {
                let success_rate = p.breaker.success_rate();
                let status = match p.breaker.current_state() {
                    BreakerState::Open => HealthStatus::Unhealthy,
                    _ if failed.contains(&p.descriptor.name) => HealthStatus::Unhealthy,
                    BreakerState::HalfOpen => HealthStatus::Degraded,
                    BreakerState::Closed if success_rate < DEGRADED_SUCCESS_RATE => {
                        HealthStatus::Degraded
                    }
                    BreakerState::Closed => HealthStatus::Healthy,
                };
                (
                    p.descriptor.name.clone(),
                    ProviderHealth::new(status, 1.0 - success_rate),
                )
            })
            .collect()
    }
}

impl HealthSource for FailoverManager {
    fn snapshot(&self) -> HashMap<String, ProviderHealth> {
        self.health_snapshot()
    }
}

fn build_response(
    descriptor: &ProviderDescriptor,
    request: &CompletionRequest,
    reply: ProviderReply,
    elapsed: Duration,
) -> CompletionResponse {
    let tokens = estimate_tokens(request.prompt_chars(), reply.content.chars().count());
    CompletionResponse {
        metadata: ResponseMetadata {
            provider: descriptor.name.clone(),
            model: descriptor.model.clone(),
            duration: elapsed.as_millis() as u64,
            tokens,
            cost: tokens as f64 * descriptor.cost_per_token,
        },
        content: reply.content,
        role: reply.role,
        finish_reason: reply.finish_reason,
    }
}

//! Health-scaled rate limiting.
//!
//! # Responsibilities
//! - Resolve the target provider of a request
//! - Scale the base limits by that provider's live health
//! - Evaluate the caller against the scaled limits, per provider
//!
//! # Scaling
//! ```text
//! healthy → 1.0, degraded → 0.6, unhealthy → 0.3, unknown/absent → 0.5
//! error_rate > 0.1 → × 0.7
//! effective = floor(base × multiplier)
//! ```
//!
//! Scaled limits are computed per call and passed into the evaluation; the
//! base settings are never modified, so concurrent calls cannot observe each
//! other's limits.

use std::sync::Arc;

use crate::health::state::{HealthSource, HealthStatus, ProviderHealth};
use crate::security::rate_limit::{provider_key, RateLimitDecision, RateLimitSettings, RateLimiter};

/// Multipliers in basis points so the products stay exact.
const BASIS: u64 = 10_000;
const ERROR_RATE_THRESHOLD: f64 = 0.1;
const ERROR_PENALTY_BPS: u64 = 7_000;

fn status_bps(status: HealthStatus) -> u64 {
    match status {
        HealthStatus::Healthy => 10_000,
        HealthStatus::Degraded => 6_000,
        HealthStatus::Unhealthy => 3_000,
        HealthStatus::Unknown => 5_000,
    }
}

fn multiplier_bps(health: Option<&ProviderHealth>) -> u64 {
    let Some(health) = health else {
        return status_bps(HealthStatus::Unknown);
    };
    let bps = status_bps(health.status);
    if health.error_rate > ERROR_RATE_THRESHOLD {
        bps * ERROR_PENALTY_BPS / BASIS
    } else {
        bps
    }
}

/// Limit multiplier for a provider's health.
pub fn multiplier_for(health: Option<&ProviderHealth>) -> f64 {
    multiplier_bps(health) as f64 / BASIS as f64
}

/// Scale `base` by a health multiplier given in basis points.
fn scale(base: &RateLimitSettings, bps: u64) -> RateLimitSettings {
    RateLimitSettings {
        max_requests: (u64::from(base.max_requests) * bps / BASIS) as u32,
        max_tokens: base.max_tokens.map(|t| t.saturating_mul(bps) / BASIS),
        ..base.clone()
    }
}

/// Outcome of an adaptive check.
#[derive(Debug, Clone)]
pub struct AdaptiveDecision {
    pub decision: RateLimitDecision,
    /// Provider whose health scaled the limits, if one was resolved.
    pub provider: Option<String>,
    pub multiplier: f64,
}

pub struct AdaptiveRateLimiter {
    base: Arc<RateLimiter>,
    health: Arc<dyn HealthSource>,
    default_provider: Option<String>,
}

impl AdaptiveRateLimiter {
    pub fn new(
        base: Arc<RateLimiter>,
        health: Arc<dyn HealthSource>,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            base,
            health,
            default_provider,
        }
    }

    pub fn base(&self) -> &Arc<RateLimiter> {
        &self.base
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    fn target<'a>(&'a self, hint: Option<&'a str>) -> Option<&'a str> {
        hint.or(self.default_provider.as_deref())
    }

    fn bps(&self, provider: Option<&str>) -> u64 {
        match provider {
            Some(name) => multiplier_bps(self.health.snapshot().get(name)),
            None => multiplier_bps(None),
        }
    }

    /// Current multiplier for `provider` (or the default provider).
    pub fn multiplier(&self, provider: Option<&str>) -> f64 {
        self.bps(self.target(provider)) as f64 / BASIS as f64
    }

    /// Limits a request for `provider` would be evaluated against now.
    pub fn effective_settings(&self, provider: Option<&str>) -> RateLimitSettings {
        scale(&self.base.settings(), self.bps(self.target(provider)))
    }

    /// Check `client_key` against the health-scaled limits of the target provider.
    pub fn check_limit(
        &self,
        client_key: &str,
        units: u64,
        provider_hint: Option<&str>,
    ) -> AdaptiveDecision {
        let provider = self.target(provider_hint);
        let bps = self.bps(provider);
        let settings = scale(&self.base.settings(), bps);
        let key = provider_key(provider.unwrap_or("unknown"), client_key);

        let decision = self.base.check_with(&key, units, &settings);
        if !decision.allowed {
            tracing::debug!(
                provider = provider.unwrap_or("unknown"),
                multiplier = bps as f64 / BASIS as f64,
                effective_max_requests = settings.max_requests,
                "Adaptive limit applied"
            );
        }

        AdaptiveDecision {
            decision,
            provider: provider.map(str::to_string),
            multiplier: bps as f64 / BASIS as f64,
        }
    }
}

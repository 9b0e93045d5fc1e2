//! Provider health snapshot.
//!
//! # States
//! - Healthy: breaker closed and provider not excluded
//! - Degraded: breaker half-open or recent success rate below 90%
//! - Unhealthy: breaker open or provider excluded from failover
//! - Unknown: no information about the provider
//!
//! Consumers (the adaptive rate limiter) read snapshots through
//! [`HealthSource`], so the snapshot may come from the failover controller or
//! from an external monitoring collaborator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Coarse provider health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Live health of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub status: HealthStatus,
    /// Failed share of recent calls, in `[0, 1]`.
    pub error_rate: f64,
}

impl ProviderHealth {
    pub fn new(status: HealthStatus, error_rate: f64) -> Self {
        Self { status, error_rate }
    }
}

/// Accessor for the current health of every provider.
pub trait HealthSource: Send + Sync {
    fn snapshot(&self) -> HashMap<String, ProviderHealth>;
}

impl<F> HealthSource for F
where
    F: Fn() -> HashMap<String, ProviderHealth> + Send + Sync,
{
    fn snapshot(&self) -> HashMap<String, ProviderHealth> {
        self()
    }
}

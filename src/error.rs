//! Gateway error taxonomy.
//!
//! Provider-level failures (`CircuitOpen`, `ProviderRequest`, `Timeout`,
//! `Transport`) are recorded by the failover controller and never reach the
//! caller directly. Callers only see `RateLimited`, `NoProvidersAvailable` or
//! `AllProvidersFailed`.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the resilience layer.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Call rejected without attempting I/O because the breaker is open.
    #[error("Circuit breaker '{name}' is open, next attempt in {}ms", retry_after.as_millis())]
    CircuitOpen { name: String, retry_after: Duration },

    /// Non-success HTTP status or malformed provider response.
    #[error("Provider '{provider}' request failed{}: {message}", status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    ProviderRequest {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Operation aborted past its deadline.
    #[error("Provider '{provider}' timed out after {}ms", after.as_millis())]
    Timeout { provider: String, after: Duration },

    /// Connection-level failure talking to an upstream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Every candidate provider was tried and failed.
    #[error("All providers failed after {attempts} attempts. Last error: {last}")]
    AllProvidersFailed {
        attempts: usize,
        last: Box<GatewayError>,
    },

    /// The available provider list was empty.
    #[error("No providers available")]
    NoProvidersAvailable,

    /// Admission control denied the request.
    #[error("Rate limit exceeded ({scope}: {limit}), retry after {}ms", retry_after.as_millis())]
    RateLimited {
        scope: String,
        limit: u64,
        retry_after: Duration,
    },

    /// Invalid gateway or provider configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::ProviderRequest { .. } => "provider_request",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Transport(_) => "transport",
            GatewayError::AllProvidersFailed { .. } => "all_providers_failed",
            GatewayError::NoProvidersAvailable => "no_providers",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Config(_) => "config",
        }
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_message_contains_last_error() {
        let last = GatewayError::ProviderRequest {
            provider: "p3".into(),
            status: Some(500),
            message: "upstream exploded".into(),
        };
        let err = GatewayError::AllProvidersFailed {
            attempts: 3,
            last: Box::new(last),
        };
        let msg = err.to_string();
        assert!(msg.contains("upstream exploded"));
        assert!(msg.contains("status 500"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(GatewayError::Transport("reset".into()).kind(), "transport");
        assert_eq!(GatewayError::NoProvidersAvailable.kind(), "no_providers");
        assert_eq!(
            GatewayError::CircuitOpen {
                name: "x".into(),
                retry_after: Duration::from_secs(1)
            }
            .kind(),
            "circuit_open"
        );
    }
}

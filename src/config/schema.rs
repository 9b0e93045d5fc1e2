//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::providers::descriptor::ProviderDialect;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, request limits).
    pub listener: ListenerConfig,

    /// Upstream provider definitions.
    pub providers: Vec<ProviderConfig>,

    /// Circuit breaker settings for provider request traffic.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Admission control configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Total time allowed for a completion request, in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 120,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Upstream provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Unique provider identifier ("openai", "anthropic", ...).
    pub name: String,

    /// Completion endpoint URL.
    pub endpoint: String,

    /// API credential sent with every request.
    #[serde(default)]
    pub credential: String,

    /// Model identifier sent upstream.
    pub model: String,

    /// Default completion token cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,

    /// Selection priority (lower = preferred).
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Estimated cost of one token.
    #[serde(default)]
    pub cost_per_token: f64,

    /// Optional endpoint polled by the health monitor.
    #[serde(default)]
    pub health_check_endpoint: Option<String>,

    /// Wire dialect; inferred from the name when absent.
    #[serde(default)]
    pub dialect: Option<ProviderDialect>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_provider_timeout_ms() -> u64 {
    30_000
}

fn default_priority() -> u32 {
    100
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures that open the breaker once the volume threshold is met.
    pub failure_threshold: u32,

    /// Minimum calls before the breaker may open.
    pub volume_threshold: u32,

    /// Failure percentage that opens the breaker.
    pub error_threshold_percentage: f64,

    /// Cooldown before a trial call, in milliseconds.
    pub timeout_ms: u64,

    /// Age limit of response-time samples, in milliseconds.
    pub monitoring_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            volume_threshold: 10,
            error_threshold_percentage: 50.0,
            timeout_ms: 60_000,
            monitoring_window_ms: 60_000,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in milliseconds.
    pub timeout_ms: u64,

    /// Failures that open a provider's health breaker.
    pub failure_threshold: u32,

    /// Cooldown of a provider's health breaker, in milliseconds.
    pub breaker_timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_ms: 5_000,
            failure_threshold: 3,
            breaker_timeout_ms: 30_000,
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable admission control.
    pub enabled: bool,

    /// Per-client limits.
    pub client: LimitConfig,

    /// Account-wide limits shared by every caller.
    pub global: Option<LimitConfig>,

    /// Scale per-provider limits with provider health.
    pub adaptive: Option<AdaptiveConfig>,

    /// Idle time after which a caller's records are dropped, in seconds.
    pub cache_ttl_secs: u64,

    /// Maximum tracked callers per limiter.
    pub max_entries: usize,

    /// Interval of the expired-entry sweep, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            client: LimitConfig::default(),
            global: None,
            adaptive: None,
            cache_ttl_secs: 600,
            max_entries: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

/// A single window/bucket budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests allowed per window.
    pub max_requests: u32,

    /// Optional token budget per window.
    pub max_tokens: Option<u64>,

    /// Token refill granularity in milliseconds.
    pub refill_interval_ms: u64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 60,
            max_tokens: None,
            refill_interval_ms: 1_000,
        }
    }
}

/// Health-scaled per-provider limits.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Base limits before health scaling.
    pub limits: LimitConfig,

    /// Provider assumed when a request names none; the preferred provider when unset.
    pub default_provider: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Provider names unique, endpoints parse as URLs
//! - Validate value ranges (timeouts > 0, limits > 0)
//!
//! Returns every validation error, not just the first.

use std::collections::HashSet;

use crate::config::schema::{GatewayConfig, LimitConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.providers.is_empty() {
        errors.push(ValidationError::new("providers", "at least one provider is required"));
    }

    let mut names = HashSet::new();
    for (i, provider) in config.providers.iter().enumerate() {
        let field = |name: &str| format!("providers[{}].{}", i, name);

        if provider.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !names.insert(provider.name.as_str()) {
            errors.push(ValidationError::new(
                field("name"),
                format!("duplicate provider '{}'", provider.name),
            ));
        }
        if let Err(e) = url::Url::parse(&provider.endpoint) {
            errors.push(ValidationError::new(field("endpoint"), format!("invalid URL: {}", e)));
        }
        if let Some(health) = &provider.health_check_endpoint {
            if let Err(e) = url::Url::parse(health) {
                errors.push(ValidationError::new(
                    field("health_check_endpoint"),
                    format!("invalid URL: {}", e),
                ));
            }
        }
        if provider.model.trim().is_empty() {
            errors.push(ValidationError::new(field("model"), "must not be empty"));
        }
        if provider.timeout_ms == 0 {
            errors.push(ValidationError::new(field("timeout_ms"), "must be greater than 0"));
        }
        if provider.cost_per_token < 0.0 || !provider.cost_per_token.is_finite() {
            errors.push(ValidationError::new(
                field("cost_per_token"),
                "must be a non-negative number",
            ));
        }
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }
    if !(0.0..=100.0).contains(&cb.error_threshold_percentage) {
        errors.push(ValidationError::new(
            "circuit_breaker.error_threshold_percentage",
            "must be between 0 and 100",
        ));
    }
    if cb.timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.timeout_ms", "must be greater than 0"));
    }

    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be greater than 0"));
    }

    let rl = &config.rate_limit;
    validate_limit("rate_limit.client", &rl.client, &mut errors);
    if let Some(global) = &rl.global {
        validate_limit("rate_limit.global", global, &mut errors);
    }
    if let Some(adaptive) = &rl.adaptive {
        validate_limit("rate_limit.adaptive.limits", &adaptive.limits, &mut errors);
        if let Some(default) = &adaptive.default_provider {
            if !config.providers.iter().any(|p| &p.name == default) {
                errors.push(ValidationError::new(
                    "rate_limit.adaptive.default_provider",
                    format!("unknown provider '{}'", default),
                ));
            }
        }
    }
    if rl.max_entries == 0 {
        errors.push(ValidationError::new("rate_limit.max_entries", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_limit(prefix: &str, limit: &LimitConfig, errors: &mut Vec<ValidationError>) {
    if limit.window_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.window_ms", prefix),
            "must be greater than 0",
        ));
    }
    if limit.max_requests == 0 {
        errors.push(ValidationError::new(
            format!("{}.max_requests", prefix),
            "must be greater than 0",
        ));
    }
    if limit.refill_interval_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.refill_interval_ms", prefix),
            "must be greater than 0",
        ));
    }
    if limit.max_tokens == Some(0) {
        errors.push(ValidationError::new(
            format!("{}.max_tokens", prefix),
            "must be greater than 0",
        ));
    }
}

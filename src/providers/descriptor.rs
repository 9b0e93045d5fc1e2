//! Provider descriptors.
//!
//! # Responsibilities
//! - Represent a single upstream completion provider
//! - Resolve the wire dialect spoken by the provider

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;

/// Request/response shape a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderDialect {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure")]
    AzureOpenAi,
    Anthropic,
    /// Canonical payload in, canonical payload out.
    Passthrough,
}

impl ProviderDialect {
    /// Infer the dialect from a provider name.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "openai" => ProviderDialect::OpenAi,
            "azure" | "azure-openai" | "azure_openai" => ProviderDialect::AzureOpenAi,
            "anthropic" | "claude" => ProviderDialect::Anthropic,
            _ => ProviderDialect::Passthrough,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderDialect::OpenAi => "openai",
            ProviderDialect::AzureOpenAi => "azure",
            ProviderDialect::Anthropic => "anthropic",
            ProviderDialect::Passthrough => "passthrough",
        }
    }
}

/// Immutable description of one upstream provider.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub endpoint: String,
    pub credential: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// Lower is preferred.
    pub priority: u32,
    pub cost_per_token: f64,
    pub health_check_endpoint: Option<String>,
    pub dialect: ProviderDialect,
}

impl ProviderDescriptor {
    pub fn has_health_check(&self) -> bool {
        self.health_check_endpoint.is_some()
    }
}

impl From<&ProviderConfig> for ProviderDescriptor {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            credential: config.credential.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_millis(config.timeout_ms),
            priority: config.priority,
            cost_per_token: config.cost_per_token,
            health_check_endpoint: config.health_check_endpoint.clone(),
            dialect: config
                .dialect
                .unwrap_or_else(|| ProviderDialect::from_name(&config.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_inferred_from_name() {
        assert_eq!(ProviderDialect::from_name("OpenAI"), ProviderDialect::OpenAi);
        assert_eq!(ProviderDialect::from_name("azure"), ProviderDialect::AzureOpenAi);
        assert_eq!(ProviderDialect::from_name("anthropic"), ProviderDialect::Anthropic);
        assert_eq!(ProviderDialect::from_name("local-llama"), ProviderDialect::Passthrough);
    }

    #[test]
    fn test_configured_dialect_wins() {
        let config = ProviderConfig {
            name: "openai".into(),
            endpoint: "https://proxy.internal/v1/messages".into(),
            credential: "sk".into(),
            model: "m".into(),
            max_tokens: 1024,
            timeout_ms: 5_000,
            priority: 1,
            cost_per_token: 0.0,
            health_check_endpoint: None,
            dialect: Some(ProviderDialect::Anthropic),
        };
        let descriptor = ProviderDescriptor::from(&config);
        assert_eq!(descriptor.dialect, ProviderDialect::Anthropic);
        assert_eq!(descriptor.timeout, Duration::from_secs(5));
        assert!(!descriptor.has_health_check());
    }
}

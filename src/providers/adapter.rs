//! Dialect adapters.
//!
//! # Responsibilities
//! - Rewrite the canonical completion request into each provider's body
//! - Normalize provider replies into the canonical response
//! - Produce per-dialect authentication headers
//!
//! # Data Flow
//! ```text
//! CompletionRequest → transform_request → provider body (serde_json::Value)
//! provider reply    → transform_response → ProviderReply → CompletionResponse
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{GatewayError, GatewayResult};
use crate::providers::descriptor::{ProviderDescriptor, ProviderDialect};

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Provider-agnostic completion request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Preferred provider, used as the adaptive rate-limit hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl CompletionRequest {
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// Normalized provider reply, before metadata is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub content: String,
    pub role: String,
    pub finish_reason: Option<String>,
}

/// Per-call accounting attached to every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub provider: String,
    pub model: String,
    /// Wall time of the successful attempt, in milliseconds.
    pub duration: u64,
    pub tokens: u64,
    pub cost: f64,
}

/// Provider-agnostic completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResponse {
    pub content: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub metadata: ResponseMetadata,
}

/// Build the provider-specific request body.
pub fn transform_request(descriptor: &ProviderDescriptor, request: &CompletionRequest) -> Value {
    let max_tokens = request.max_tokens.unwrap_or(descriptor.max_tokens);
    let temperature = request.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    let stream = request.stream.unwrap_or(false);

    match descriptor.dialect {
        ProviderDialect::OpenAi | ProviderDialect::AzureOpenAi => json!({
            "model": descriptor.model,
            "messages": request.messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "stream": stream,
        }),
        ProviderDialect::Anthropic => {
            let (system, messages): (Vec<_>, Vec<_>) =
                request.messages.iter().partition(|m| m.role == "system");
            let mut body = json!({
                "model": descriptor.model,
                "max_tokens": max_tokens,
                "messages": messages,
                "temperature": temperature,
                "stream": stream,
            });
            if !system.is_empty() {
                let text = system
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                body["system"] = Value::String(text);
            }
            body
        }
        ProviderDialect::Passthrough => json!({
            "messages": request.messages,
            "temperature": temperature,
            "maxTokens": max_tokens,
            "stream": stream,
        }),
    }
}

/// Normalize a provider reply. A reply without content is malformed.
pub fn transform_response(
    descriptor: &ProviderDescriptor,
    body: &Value,
) -> GatewayResult<ProviderReply> {
    let (content, role, finish_reason) = match descriptor.dialect {
        ProviderDialect::OpenAi | ProviderDialect::AzureOpenAi => {
            let choice = &body["choices"][0];
            (
                choice["message"]["content"].as_str(),
                choice["message"]["role"].as_str(),
                choice["finish_reason"].as_str(),
            )
        }
        ProviderDialect::Anthropic => (
            body["content"][0]["text"].as_str(),
            body["role"].as_str(),
            body["stop_reason"].as_str(),
        ),
        ProviderDialect::Passthrough => (
            body["content"].as_str(),
            body["role"].as_str(),
            body["finishReason"].as_str(),
        ),
    };

    let content = content.ok_or_else(|| GatewayError::ProviderRequest {
        provider: descriptor.name.clone(),
        status: None,
        message: "malformed response: missing content".to_string(),
    })?;

    Ok(ProviderReply {
        content: content.to_string(),
        role: role.unwrap_or("assistant").to_string(),
        finish_reason: finish_reason.map(str::to_string),
    })
}

/// Authentication headers for the provider's dialect.
pub fn auth_headers(descriptor: &ProviderDescriptor) -> Vec<(&'static str, String)> {
    match descriptor.dialect {
        ProviderDialect::OpenAi | ProviderDialect::Passthrough => {
            vec![("authorization", format!("Bearer {}", descriptor.credential))]
        }
        ProviderDialect::AzureOpenAi => vec![("api-key", descriptor.credential.clone())],
        ProviderDialect::Anthropic => vec![
            ("x-api-key", descriptor.credential.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ],
    }
}

/// Rough token count: four characters per token, rounded up per side.
pub fn estimate_tokens(prompt_chars: usize, completion_chars: usize) -> u64 {
    (prompt_chars.div_ceil(4) + completion_chars.div_ceil(4)) as u64
}

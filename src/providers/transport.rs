//! Provider transport.
//!
//! The failover controller talks to upstreams only through
//! [`ProviderTransport`], so tests can script provider behaviour without
//! sockets. [`HttpTransport`] is the production implementation over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::providers::adapter::auth_headers;
use crate::providers::descriptor::ProviderDescriptor;

/// Longest upstream error body echoed into an error message.
const MAX_ERROR_BODY: usize = 256;

#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Send a dialect-specific body and return the decoded JSON reply.
    async fn send(&self, descriptor: &ProviderDescriptor, body: Value) -> GatewayResult<Value>;

    /// Call the provider's health endpoint.
    async fn health_check(
        &self,
        descriptor: &ProviderDescriptor,
        timeout: Duration,
    ) -> GatewayResult<()>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("llm-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn send(&self, descriptor: &ProviderDescriptor, body: Value) -> GatewayResult<Value> {
        let mut request = self.client.post(&descriptor.endpoint).json(&body);
        for (name, value) in auth_headers(descriptor) {
            request = request.header(name, value);
        }

        let call = async {
            let response = request.send().await.map_err(|e| transport_error(descriptor, e))?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(GatewayError::ProviderRequest {
                    provider: descriptor.name.clone(),
                    status: Some(status.as_u16()),
                    message: truncate(&text),
                });
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| GatewayError::ProviderRequest {
                    provider: descriptor.name.clone(),
                    status: Some(status.as_u16()),
                    message: format!("malformed response: {e}"),
                })
        };

        match tokio::time::timeout(descriptor.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                provider: descriptor.name.clone(),
                after: descriptor.timeout,
            }),
        }
    }

    async fn health_check(
        &self,
        descriptor: &ProviderDescriptor,
        timeout: Duration,
    ) -> GatewayResult<()> {
        let Some(endpoint) = descriptor.health_check_endpoint.as_deref() else {
            return Ok(());
        };

        let check = self
            .client
            .get(endpoint)
            .bearer_auth(&descriptor.credential)
            .send();

        match tokio::time::timeout(timeout, check).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(GatewayError::ProviderRequest {
                provider: descriptor.name.clone(),
                status: Some(response.status().as_u16()),
                message: "health check returned non-success status".to_string(),
            }),
            Ok(Err(e)) => Err(transport_error(descriptor, e)),
            Err(_) => Err(GatewayError::Timeout {
                provider: descriptor.name.clone(),
                after: timeout,
            }),
        }
    }
}

fn transport_error(descriptor: &ProviderDescriptor, error: reqwest::Error) -> GatewayError {
    GatewayError::Transport(format!("{}: {}", descriptor.name, error))
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_ERROR_BODY {
        return text.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(200);
        let out = truncate(&long);
        assert!(out.ends_with("..."));
        assert!(out.len() <= MAX_ERROR_BODY + 3);
        assert_eq!(truncate("short"), "short");
    }
}

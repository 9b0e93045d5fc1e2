//! Public request handlers.
//!
//! # Data Flow
//! ```text
//! POST /v1/completions
//!     → global limiter (X-RateLimit-Global-*)
//!     → client limiter (X-RateLimit-*)
//!     → adaptive provider limiter (X-RateLimit-Provider-*)
//!     → FailoverManager::execute_with_failover
//!     → canonical response + rate-limit headers
//! ```

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::http::request::{identity, request_id};
use crate::http::response::{with_headers, ApiError};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::providers::adapter::{estimate_tokens, CompletionRequest};
use crate::security::{default_key, RateLimitDecision, GLOBAL_KEY};

/// Record a denial's headers and turn it into a 429.
fn deny(
    decision: &RateLimitDecision,
    scope: &'static str,
    headers: &[(String, String)],
    start: Instant,
) -> Response {
    metrics::record_request("rate_limited", "none", start);
    with_headers(ApiError(decision.to_error(scope)).into_response(), headers)
}

pub async fn completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    Json(request): Json<CompletionRequest>,
) -> Response {
    let start = Instant::now();
    let context = &state.context;
    let request_id = request_id(&headers);
    let peer = extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let caller = identity(&headers, peer);
    let units = estimate_tokens(request.prompt_chars(), 0);
    let mut rate_headers = Vec::new();

    tracing::debug!(
        request_id = %request_id,
        messages = request.messages.len(),
        provider_hint = ?request.provider,
        "Completion request"
    );

    if let Some(global) = &context.global_limiter {
        let decision = global.check_limit(GLOBAL_KEY, units);
        rate_headers.extend(decision.headers("X-RateLimit-Global"));
        if !decision.allowed {
            return deny(&decision, "global", &rate_headers, start);
        }
    }

    let client_key = match &context.client_limiter {
        Some(client) => {
            let key = client.key_for(&caller);
            let decision = client.check_limit(&key, units);
            rate_headers.extend(decision.headers("X-RateLimit"));
            if !decision.allowed {
                return deny(&decision, "client", &rate_headers, start);
            }
            key
        }
        None => default_key(&caller),
    };

    if let Some(adaptive) = &context.adaptive_limiter {
        // Explicit hint, then the configured default, then the provider requests go to now.
        let hint = request.provider.clone().or_else(|| {
            adaptive
                .default_provider()
                .is_none()
                .then(|| context.failover.current_provider())
        });
        let outcome = adaptive.check_limit(&client_key, units, hint.as_deref());
        rate_headers.extend(outcome.decision.headers("X-RateLimit-Provider"));
        if !outcome.decision.allowed {
            return deny(&outcome.decision, "provider", &rate_headers, start);
        }
    }

    match context.failover.execute_with_failover(&request).await {
        Ok(response) => {
            metrics::record_request("success", &response.metadata.provider, start);
            tracing::info!(
                request_id = %request_id,
                provider = %response.metadata.provider,
                tokens = response.metadata.tokens,
                duration_ms = response.metadata.duration,
                "Completion served"
            );
            with_headers((StatusCode::OK, Json(response)).into_response(), &rate_headers)
        }
        Err(err) => {
            metrics::record_request(err.kind(), "none", start);
            tracing::error!(request_id = %request_id, error = %err, "Completion failed");
            with_headers(ApiError(err).into_response(), &rate_headers)
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub current_provider: String,
    pub available_providers: usize,
}

/// Liveness. Reports `degraded` while every provider is excluded.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let available = state.context.failover.available_providers().len();
    Json(HealthResponse {
        status: if available > 0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        current_provider: state.context.failover.current_provider(),
        available_providers: available,
    })
}

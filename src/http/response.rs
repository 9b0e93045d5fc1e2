//! Response mapping.
//!
//! # Responsibilities
//! - Map gateway errors to HTTP status codes and JSON bodies
//! - Attach rate-limit headers to responses
//!
//! # Design Decisions
//! - 429 for admission denials, 503 when no provider could serve, 502 otherwise
//! - Bodies carry the gateway's error text, never a provider's reply shape

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::GatewayError;

/// A gateway error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        GatewayError::AllProvidersFailed { .. } | GatewayError::NoProvidersAvailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = Json(json!({
            "error": {
                "type": self.0.kind(),
                "message": self.0.to_string(),
            }
        }));
        let mut response = (status, body).into_response();

        if let GatewayError::RateLimited { retry_after, .. } = &self.0 {
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Append `headers` to `response`, skipping names or values that are not valid HTTP.
pub fn with_headers(mut response: Response, headers: &[(String, String)]) -> Response {
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => tracing::debug!(header = %name, "Skipping invalid response header"),
        }
    }
    response
}

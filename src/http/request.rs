//! Request metadata.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every inbound request
//! - Derive the caller identity used as the rate-limit key
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Identity is the peer address plus the optional `x-user-id` header

use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};

use crate::security::RequestIdentity;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_USER_ID: &str = "x-user-id";

/// Longest accepted `x-user-id` value.
const MAX_USER_ID_LEN: usize = 128;

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// The request ID set by the request-id layer, or "unknown".
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Caller identity from the peer address and `x-user-id`.
pub fn identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> RequestIdentity {
    let user_id = headers
        .get(X_USER_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_USER_ID_LEN)
        .map(str::to_string);

    RequestIdentity {
        ip: peer.map(|addr| addr.ip()),
        user_id,
    }
}

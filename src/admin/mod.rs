//! Operator API, guarded by a bearer key.
//!
//! Read-only views over providers, breakers and failover state, plus breaker
//! resets. Polled by `gateway-cli` and external monitoring.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/providers", get(get_providers))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/failover", get(get_failover))
        .route("/admin/breakers/reset", post(reset_all_breakers))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}

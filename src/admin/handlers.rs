use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::http::server::AppState;
use crate::providers::{FailoverStats, ProviderStatus};
use crate::resilience::BreakerStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub current_provider: String,
    pub breakers: usize,
    pub tracked_clients: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let context = &state.context;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        current_provider: context.failover.current_provider(),
        breakers: context.registry.len(),
        tracked_clients: context
            .client_limiter
            .as_ref()
            .map_or(0, |limiter| limiter.tracked_keys()),
    })
}

pub async fn get_providers(State(state): State<AppState>) -> Json<Vec<ProviderStatus>> {
    Json(state.context.failover.provider_status())
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerStats>> {
    Json(state.context.registry.all_stats())
}

pub async fn get_failover(State(state): State<AppState>) -> Json<FailoverStats> {
    Json(state.context.failover.failover_stats())
}

pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let breaker = state.context.registry.get(&name).ok_or(StatusCode::NOT_FOUND)?;
    breaker.reset();
    tracing::info!(breaker = %name, "Circuit breaker reset by operator");
    Ok(Json(json!({ "reset": name, "state": breaker.current_state() })))
}

pub async fn reset_all_breakers(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.context.registry.reset_all();
    Json(json!({ "reset": state.context.registry.len() }))
}

//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the completion, health and admin handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve until an OS signal or the shutdown broadcast, then stop background tasks

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::http::handlers;
use crate::http::request::UuidRequestId;
use crate::lifecycle::{shutdown_signal, GatewayContext};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<GatewayContext>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    context: Arc<GatewayContext>,
}

impl HttpServer {
    pub fn new(context: Arc<GatewayContext>) -> Self {
        let router = Self::build_router(AppState {
            context: context.clone(),
        });
        Self { router, context }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.context.config();

        let mut router = Router::new()
            .route("/v1/completions", post(handlers::completions))
            .route("/health", get(handlers::health));

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state.clone()));
            tracing::info!("Admin API enabled");
        }

        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.listener.request_timeout_secs,
                ))),
        )
    }

    /// The fully layered router, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut stop = self.context.shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_signal() => {}
                    _ = stop.recv() => {}
                }
            })
            .await?;

        // Stop the health monitor, sweepers and reload loop.
        self.context.shutdown.trigger();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

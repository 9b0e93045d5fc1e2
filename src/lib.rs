//! LLM provider gateway library.
//!
//! Circuit breakers, priority failover across completion providers and
//! health-aware admission control, served over a small HTTP API.

pub mod admin;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod providers;
pub mod resilience;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use http::HttpServer;
pub use lifecycle::{GatewayContext, Shutdown};

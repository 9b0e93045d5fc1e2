//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → lifecycle::startup builds every subsystem from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → rate limiter settings swapped atomically
//! ```
//!
//! All fields have defaults so minimal configs stay short.

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdaptiveConfig, AdminConfig, CircuitBreakerConfig, GatewayConfig, HealthCheckConfig,
    LimitConfig, ListenerConfig, ObservabilityConfig, ProviderConfig, RateLimitConfig,
};

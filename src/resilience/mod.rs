//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Provider call:
//!     → registry.rs (look up the provider's named breaker)
//!     → circuit_breaker.rs (fail fast while open, trial call when half-open)
//!     → On transition: listeners (tracing, metrics, broadcast channel)
//! ```
//!
//! # Design Decisions
//! - Breakers are explicit values owned by the registry, never globals
//! - A cancelled call counts as a failure
//! - Listeners observe transitions after the breaker lock is released

pub mod circuit_breaker;
pub mod registry;

pub use circuit_breaker::{
    BreakerEvent, BreakerOptions, BreakerSnapshot, BreakerState, BreakerStats, CircuitBreaker,
    TransitionListener,
};
pub use registry::{ChannelListener, CircuitBreakerRegistry, TracingListener};

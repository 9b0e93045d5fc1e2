//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → FailoverManager::check_health (health checks through health breakers)
//!     → Update failed provider set
//!
//! Health snapshot (state.rs):
//!     Breaker state + failed set → {status, error_rate} per provider
//!     → consumed by the adaptive rate limiter
//! ```
//!
//! # Design Decisions
//! - Health checks never block request traffic
//! - Providers without a health endpoint are readmitted when their breaker allows calls

pub mod active;
pub mod state;

pub use state::{HealthSource, HealthStatus, ProviderHealth};

//! Upstream provider subsystem.
//!
//! # Data Flow
//! ```text
//! Completion request
//!     → failover.rs (candidate order, breaker per attempt)
//!     → adapter.rs (canonical → dialect body)
//!     → transport.rs (HTTP call with per-provider timeout)
//!     → adapter.rs (dialect reply → canonical response)
//! ```
//!
//! # Design Decisions
//! - Descriptors are immutable after registration
//! - Unknown provider names pass the canonical payload through
//! - Malformed replies count as provider failures

pub mod adapter;
pub mod descriptor;
pub mod failover;
pub mod transport;

pub use adapter::{ChatMessage, CompletionRequest, CompletionResponse, ResponseMetadata};
pub use descriptor::{ProviderDescriptor, ProviderDialect};
pub use failover::{FailoverManager, FailoverOptions, FailoverStats, ProviderStatus};
pub use transport::{HttpTransport, ProviderTransport};

//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming completion request:
//!     → rate_limit.rs (account-wide "global" key, when configured)
//!     → rate_limit.rs (per-client key)
//!     → adaptive.rs (per-provider key, limits scaled by provider health)
//!     → Pass to failover
//! ```
//!
//! # Design Decisions
//! - Denials are never retried internally; callers get `Retry-After`
//! - Per-key state lives in a bounded TTL cache (cache.rs)
//! - Token budgets (token_bucket.rs) refill in whole tokens

pub mod adaptive;
pub mod cache;
pub mod rate_limit;
pub mod token_bucket;

pub use adaptive::{AdaptiveDecision, AdaptiveRateLimiter};
pub use rate_limit::{
    default_key, provider_key, KeyFn, RateLimitDecision, RateLimitSettings, RateLimiter,
    RequestIdentity, GLOBAL_KEY,
};
pub use token_bucket::TokenBucket;

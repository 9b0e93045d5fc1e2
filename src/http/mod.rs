//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, caller identity)
//!     → handlers.rs (admission control, failover)
//!     → response.rs (status mapping, rate-limit headers)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID, X_USER_ID};
pub use server::{AppState, HttpServer};

//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → timeouts.rs (one deadline for acquire, call and backoff sleeps)
//!     → circuit_breaker.rs (admit, or fail fast while OPEN)
//!     → On transient failure: retries.rs (retry with backoff.rs delay)
//!
//! Work item:
//!     → On transient handler failure: retries.rs decides, backoff.rs delays
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Circuit breaker prevents cascading failures
//! - Retries never bypass an open circuit

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakers, CircuitOpenError, CircuitState};
pub use retries::RetryPolicy;
pub use timeouts::Deadline;

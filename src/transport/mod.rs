//! Outbound transport subsystem.
//!
//! # Data Flow
//! ```text
//! Handler → ApiClient::call(method, payload)
//!     → ConnectionPool::invoke (overall deadline)
//!         → circuit breaker admission (fail fast while OPEN)
//!         → dns.rs (cached resolution) → connector.rs (lazy session open)
//!         → Session::call (multiplexed on a pooled session)
//!         → release: outcome reported to the breaker, session returned
//!     → transient failure: jittered backoff, retry while the circuit allows
//! ```
//!
//! # Design Decisions
//! - The pool owns connection lifetimes; reqwest clients are per session
//! - 4xx answers prove the endpoint is alive and are never retried
//! - Connector and Session are traits so tests can stand in for the network

pub mod client;
pub mod connector;
pub mod dns;
pub mod endpoint;
pub mod error;
pub mod pool;

pub use client::ApiClient;
pub use connector::{ApiRequest, ApiResponse, Connector, HttpConnector, Session};
pub use dns::{DnsCache, Resolver, SystemResolver};
pub use endpoint::Endpoint;
pub use error::TransportError;
pub use pool::{ConnectionPool, Lease, PoolSnapshot};

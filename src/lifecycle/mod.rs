//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_signal returns
//!
//! Shutdown (shutdown.rs):
//!     trigger → ingestion stops reading → admin server stops
//!     → Dispatcher::stop(drain) → ConnectionPool::shutdown(grace) → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop ingestion, drain workers, close connections
//! - Every stage has a timeout: forced exit after its deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;

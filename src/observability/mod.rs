//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, one span per processed item)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Admin snapshot endpoint (see `admin`)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Work item id and sequence id flow through every log line of an item
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

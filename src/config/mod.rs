//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!     → sections handed to the subsystems that own them
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AccessConfig, AdminConfig, AnalyticsConfig, ApiConfig, BackpressureMode, CircuitBreakerConfig,
    ConnectionPoolConfig, DeadLetterConfig, LogFormat, ObservabilityConfig, PriorityConfig,
    Propagation, RateLimitConfig, RetryConfig, RouterConfig, RuntimeConfig, WorkerConfig,
};

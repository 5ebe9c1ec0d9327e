//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (counts > 0, ratios in range, addresses parse)
//! - Check cross-field consistency (keepalive never above the connection cap)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::RuntimeConfig;

/// A single semantic problem with a config value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let workers = &config.workers;
    if workers.count == 0 {
        errors.push(ValidationError::new("workers.count", "must be at least 1"));
    }
    if workers.queue_capacity == 0 {
        errors.push(ValidationError::new(
            "workers.queue_capacity",
            "must be at least 1",
        ));
    }
    if workers.retry_base_delay_ms > workers.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "workers.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }

    if config.router.command_prefix.is_whitespace() {
        errors.push(ValidationError::new(
            "router.command_prefix",
            "must not be whitespace",
        ));
    }
    if config.router.regex_cache_capacity == 0 {
        errors.push(ValidationError::new(
            "router.regex_cache_capacity",
            "must be at least 1",
        ));
    }

    let pool = &config.connection_pool;
    if pool.max_connections == 0 {
        errors.push(ValidationError::new(
            "connection_pool.max_connections",
            "must be at least 1",
        ));
    }
    if pool.max_keepalive > pool.max_connections {
        errors.push(ValidationError::new(
            "connection_pool.max_keepalive",
            format!(
                "{} exceeds max_connections ({})",
                pool.max_keepalive, pool.max_connections
            ),
        ));
    }
    if pool.max_streams_per_session == 0 {
        errors.push(ValidationError::new(
            "connection_pool.max_streams_per_session",
            "must be at least 1",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be at least 1",
        ));
    }
    if breaker.window_secs == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.window_secs",
            "must be at least 1",
        ));
    }
    if !(0.0..=1.0).contains(&breaker.failure_rate) {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_rate",
            "must be between 0.0 and 1.0",
        ));
    }
    if breaker.cooldown_multiplier < 1.0 {
        errors.push(ValidationError::new(
            "circuit_breaker.cooldown_multiplier",
            "must be at least 1.0",
        ));
    }
    if breaker.cooldown_ms > breaker.max_cooldown_ms {
        errors.push(ValidationError::new(
            "circuit_breaker.cooldown_ms",
            "must not exceed max_cooldown_ms",
        ));
    }
    if breaker.half_open_max_trials == 0 || breaker.success_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_max_trials",
            "trial count and success threshold must be at least 1",
        ));
    }

    if url::Url::parse(&config.api.base_url).is_err() {
        errors.push(ValidationError::new(
            "api.base_url",
            format!("`{}` is not a valid URL", config.api.base_url),
        ));
    }

    if config.rate_limit.enabled
        && (config.rate_limit.requests_per_minute == 0 || config.rate_limit.burst_size == 0)
    {
        errors.push(ValidationError::new(
            "rate_limit",
            "requests_per_minute and burst_size must be positive when enabled",
        ));
    }

    if config.analytics.enabled && config.analytics.max_tracked_users == 0 {
        errors.push(ValidationError::new(
            "analytics.max_tracked_users",
            "must be positive when analytics is enabled",
        ));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", obs.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("`{}` is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be set when admin is enabled",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the runtime.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::event::UpdateKind;

/// Root configuration for the dispatch runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool and work queue settings.
    pub workers: WorkerConfig,

    /// Priority tier per update kind.
    pub priorities: PriorityConfig,

    /// Router behaviour (strictness, propagation, command prefix).
    pub router: RouterConfig,

    /// Outbound connection pool settings.
    pub connection_pool: ConnectionPoolConfig,

    /// Per-endpoint circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Outbound call retry settings.
    pub retries: RetryConfig,

    /// Bot API endpoint and credentials.
    pub api: ApiConfig,

    /// Per-user rate limiting middleware.
    pub rate_limit: RateLimitConfig,

    /// User allow/block lists.
    pub access: AccessConfig,

    /// Per-command and per-user usage statistics.
    pub analytics: AnalyticsConfig,

    /// Dead letter persistence.
    pub dead_letter: DeadLetterConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Admin HTTP surface.
    pub admin: AdminConfig,
}

/// What `submit` does when the work queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Wait for a free slot, up to `submit_timeout_ms`.
    #[default]
    Block,
    /// Fail immediately with `QueueFull`.
    Reject,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    pub count: usize,

    /// Maximum queued (not yet started) work items.
    pub queue_capacity: usize,

    pub backpressure: BackpressureMode,

    /// Upper bound on how long a blocking submit waits for a slot.
    pub submit_timeout_ms: u64,

    /// Retries of a transiently failing work item before dead-lettering.
    pub max_retries: u32,

    /// Base delay for exponential backoff between attempts in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds.
    pub retry_max_delay_ms: u64,

    /// How long a draining stop waits for workers before giving up, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 50,
            queue_capacity: 1000,
            backpressure: BackpressureMode::Block,
            submit_timeout_ms: 5_000,
            max_retries: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 10_000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Priority tier per update kind. Higher is dequeued first.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub callback_query: u8,
    pub inline_query: u8,
    /// Messages whose text parses as a command.
    pub command: u8,
    pub message: u8,
    pub edited_message: u8,
    pub chat_member_update: u8,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            callback_query: 3,
            inline_query: 3,
            command: 2,
            message: 1,
            edited_message: 1,
            chat_member_update: 0,
        }
    }
}

impl PriorityConfig {
    /// Tier for `kind`; `is_command` upgrades plain messages.
    pub fn tier(&self, kind: UpdateKind, is_command: bool) -> u8 {
        match kind {
            UpdateKind::CallbackQuery => self.callback_query,
            UpdateKind::InlineQuery => self.inline_query,
            UpdateKind::Message if is_command => self.command,
            UpdateKind::Message => self.message,
            UpdateKind::EditedMessage => self.edited_message,
            UpdateKind::ChatMemberUpdate => self.chat_member_update,
        }
    }
}

/// How many matching handlers run for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Stop after the first handler that reports the event handled.
    #[default]
    FirstMatch,
    /// Run every matching handler unless one stops propagation.
    RunAll,
}

/// Router configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Reject a second command route with the same name and priority.
    pub strict: bool,

    pub propagation: Propagation,

    /// Character that introduces a command.
    pub command_prefix: char,

    /// When set, `/cmd@other_bot` is ignored.
    pub bot_username: Option<String>,

    /// Compiled regex cache size.
    pub regex_cache_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strict: false,
            propagation: Propagation::FirstMatch,
            command_prefix: '/',
            bot_username: None,
            regex_cache_capacity: 256,
        }
    }
}

/// Outbound connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Hard cap on open sessions across all endpoints.
    pub max_connections: usize,

    /// Idle sessions kept for reuse.
    pub max_keepalive: usize,

    /// Idle sessions older than this are closed, in seconds.
    pub keepalive_expiry_secs: u64,

    /// Concurrent calls multiplexed onto one session.
    pub max_streams_per_session: usize,

    /// How long `acquire` waits for a session when the pool is full.
    pub acquire_timeout_ms: u64,

    pub connect_timeout_ms: u64,

    /// Speak HTTP/2 without upgrade negotiation.
    pub http2_prior_knowledge: bool,

    /// Resolved addresses are reused for this long, in seconds.
    pub dns_ttl_secs: u64,

    /// Grace period for in-flight calls on shutdown, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_keepalive: 50,
            keepalive_expiry_secs: 30,
            max_streams_per_session: 100,
            acquire_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            http2_prior_knowledge: false,
            dns_ttl_secs: 300,
            shutdown_grace_secs: 10,
        }
    }
}

impl ConnectionPoolConfig {
    pub fn keepalive_expiry(&self) -> Duration {
        Duration::from_secs(self.keepalive_expiry_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn dns_ttl(&self) -> Duration {
        Duration::from_secs(self.dns_ttl_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Circuit breaker configuration, applied to every endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit.
    pub failure_threshold: u32,

    /// Rolling window length in seconds.
    pub window_secs: u64,

    /// Failure ratio that opens the circuit; 0 disables the rate rule.
    pub failure_rate: f64,

    /// Calls required in the window before the rate rule applies.
    pub min_calls: u32,

    /// First cooldown in milliseconds.
    pub cooldown_ms: u64,

    /// Cooldown growth factor after a failed trial.
    pub cooldown_multiplier: f64,

    /// Cooldown ceiling in milliseconds.
    pub max_cooldown_ms: u64,

    /// Concurrent trial calls admitted while half-open.
    pub half_open_max_trials: u32,

    /// Consecutive trial successes that close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 10,
            failure_rate: 0.0,
            min_calls: 20,
            cooldown_ms: 30_000,
            cooldown_multiplier: 2.0,
            max_cooldown_ms: 300_000,
            half_open_max_trials: 1,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }
}

/// Outbound call retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 disables retries).
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Overall deadline for one API call including retries, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Bot API endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,

    /// Bot token; becomes the `/bot<token>` path prefix.
    pub token: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.telegram.org".to_string(),
            token: String::new(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained events per minute per user.
    pub requests_per_minute: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: 20,
            burst_size: 10,
        }
    }
}

/// Usage analytics middleware.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub enabled: bool,

    /// Users with activity records; idle users are evicted past this.
    pub max_tracked_users: usize,

    /// A user counts as active while seen within this many seconds.
    pub session_timeout_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tracked_users: 10_000,
            session_timeout_secs: 1_800,
        }
    }
}

impl AnalyticsConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// User allow/block lists.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AccessConfig {
    /// When non-empty, only these users get through.
    pub allowed_users: Vec<i64>,

    pub blocked_users: Vec<i64>,
}

impl AccessConfig {
    pub fn is_active(&self) -> bool {
        !self.allowed_users.is_empty() || !self.blocked_users.is_empty()
    }
}

/// Dead letter persistence.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// JSON-lines journal; entries are kept in memory only when unset.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

//! Per-user rate limiting middleware.
//!
//! Buckets that have refilled completely are indistinguishable from new
//! ones, so they are dropped every [`PRUNE_EVERY`] checks to keep the map
//! bounded by recently active users.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

use super::{Middleware, Next};
use crate::config::RateLimitConfig;
use crate::handler::{Context, HandlerError, Outcome};
use crate::observability::metrics;

/// Checks between two sweeps of full buckets.
pub const PRUNE_EVERY: u64 = 1024;

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn is_full(&self, now: Instant, capacity: f64, refill_per_sec: f64) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_per_sec >= capacity
    }

    fn try_acquire(&mut self, capacity: f64, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token bucket per user. Events without a user are not limited.
pub struct RateLimit {
    buckets: DashMap<i64, TokenBucket>,
    refill_per_sec: f64,
    burst: f64,
    checks: AtomicU64,
}

impl RateLimit {
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            refill_per_sec: requests_per_minute as f64 / 60.0,
            burst: burst_size.max(1) as f64,
            checks: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_minute, config.burst_size)
    }

    fn check(&self, user_id: i64) -> bool {
        let allowed = self
            .buckets
            .entry(user_id)
            .or_insert_with(|| TokenBucket::new(self.burst))
            .try_acquire(self.burst, self.refill_per_sec);
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }
        allowed
    }

    /// Drop buckets that have refilled to the burst size.
    fn prune(&self) {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_full(now, self.burst, self.refill_per_sec));
        tracing::debug!(
            removed = before.saturating_sub(self.buckets.len()),
            tracked = self.buckets.len(),
            "Pruned idle rate limit buckets"
        );
    }

    /// Users with a bucket.
    pub fn tracked_users(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl Middleware for RateLimit {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn handle(&self, ctx: &Context, next: Next<'_>) -> Result<Outcome, HandlerError> {
        let Some(user) = ctx.event().user() else {
            return next.run(ctx).await;
        };
        if self.check(user.id) {
            next.run(ctx).await
        } else {
            tracing::warn!(user_id = user.id, "Rate limit exceeded");
            metrics::record_rate_limited("rate_limit");
            Ok(self.veto())
        }
    }
}

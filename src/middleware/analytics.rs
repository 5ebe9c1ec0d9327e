//! Usage analytics middleware.
//!
//! # Responsibilities
//! - Count uses, failures, vetoes and handling time per usage key: the
//!   command (`/start`) for commands, the update kind otherwise
//! - Count distinct users per key
//! - Track per-user activity and report how many users are active
//!
//! # Design Decisions
//! - Installed innermost among the built-in stages, so it measures events
//!   that reached routing and the time spent in handlers
//! - Every attempt counts as a use; retried failures lower the success rate
//! - User records are bounded: idle users are evicted first, then the least
//!   recently seen one

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::{Middleware, Next};
use crate::config::AnalyticsConfig;
use crate::handler::{Context, HandlerError, Outcome};

struct Usage {
    uses: u64,
    failures: u64,
    vetoed: u64,
    handling_time: Duration,
    unique_users: u64,
}

struct UserActivity {
    events: u64,
    failures: u64,
    keys: HashSet<String>,
    first_seen: Instant,
    last_seen: Instant,
}

/// Statistics for one usage key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub key: String,
    pub uses: u64,
    pub failures: u64,
    pub vetoed: u64,
    /// Share of uses that did not fail, in `0.0..=1.0`.
    pub success_rate: f64,
    pub avg_response_ms: f64,
    pub unique_users: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    pub user_id: i64,
    pub events: u64,
    pub failures: u64,
    pub distinct_keys: usize,
    /// Time between the first and the latest event of this user.
    pub session_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSnapshot {
    pub events: u64,
    pub tracked_users: usize,
    pub active_users: usize,
    /// Most used first.
    pub usage: Vec<UsageStats>,
}

pub struct Analytics {
    usage: DashMap<String, Usage>,
    users: DashMap<i64, UserActivity>,
    events: AtomicU64,
    max_tracked_users: usize,
    session_timeout: Duration,
}

impl Analytics {
    pub fn new(max_tracked_users: usize, session_timeout: Duration) -> Self {
        Self {
            usage: DashMap::new(),
            users: DashMap::new(),
            events: AtomicU64::new(0),
            max_tracked_users: max_tracked_users.max(1),
            session_timeout,
        }
    }

    pub fn from_config(config: &AnalyticsConfig) -> Self {
        Self::new(config.max_tracked_users, config.session_timeout())
    }

    fn usage_key(ctx: &Context) -> String {
        match ctx.command() {
            Some(command) => format!("/{}", command.name),
            None => ctx.event().update_kind().to_string(),
        }
    }

    fn record(
        &self,
        key: String,
        user_id: Option<i64>,
        result: &Result<Outcome, HandlerError>,
        elapsed: Duration,
    ) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let failed = result.is_err();
        let new_user_for_key = user_id.is_some_and(|id| self.touch_user(id, &key, failed));

        let mut usage = self.usage.entry(key).or_insert_with(|| Usage {
            uses: 0,
            failures: 0,
            vetoed: 0,
            handling_time: Duration::ZERO,
            unique_users: 0,
        });
        usage.uses += 1;
        usage.handling_time += elapsed;
        if failed {
            usage.failures += 1;
        }
        if matches!(result, Ok(Outcome::Vetoed { .. })) {
            usage.vetoed += 1;
        }
        if new_user_for_key {
            usage.unique_users += 1;
        }
    }

    /// Update the user's record; true when `key` is new for this user.
    fn touch_user(&self, user_id: i64, key: &str, failed: bool) -> bool {
        let now = Instant::now();
        if !self.users.contains_key(&user_id) && self.users.len() >= self.max_tracked_users {
            self.evict(now);
        }
        let mut user = self.users.entry(user_id).or_insert_with(|| UserActivity {
            events: 0,
            failures: 0,
            keys: HashSet::new(),
            first_seen: now,
            last_seen: now,
        });
        user.events += 1;
        user.last_seen = now;
        if failed {
            user.failures += 1;
        }
        if user.keys.contains(key) {
            false
        } else {
            user.keys.insert(key.to_string());
            true
        }
    }

    fn evict(&self, now: Instant) {
        let timeout = self.session_timeout;
        self.users
            .retain(|_, user| now.duration_since(user.last_seen) < timeout);
        if self.users.len() < self.max_tracked_users {
            return;
        }
        let oldest = self
            .users
            .iter()
            .min_by_key(|entry| entry.last_seen)
            .map(|entry| *entry.key());
        if let Some(user_id) = oldest {
            self.users.remove(&user_id);
        }
    }

    pub fn user_stats(&self, user_id: i64) -> Option<UserStats> {
        self.users.get(&user_id).map(|user| UserStats {
            user_id,
            events: user.events,
            failures: user.failures,
            distinct_keys: user.keys.len(),
            session_secs: user.last_seen.duration_since(user.first_seen).as_secs(),
        })
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let now = Instant::now();
        let mut usage: Vec<UsageStats> = self
            .usage
            .iter()
            .map(|entry| {
                let u = entry.value();
                let uses = u.uses.max(1) as f64;
                UsageStats {
                    key: entry.key().clone(),
                    uses: u.uses,
                    failures: u.failures,
                    vetoed: u.vetoed,
                    success_rate: (u.uses - u.failures) as f64 / uses,
                    avg_response_ms: u.handling_time.as_secs_f64() * 1_000.0 / uses,
                    unique_users: u.unique_users,
                }
            })
            .collect();
        usage.sort_by(|a, b| b.uses.cmp(&a.uses).then_with(|| a.key.cmp(&b.key)));

        let active_users = self
            .users
            .iter()
            .filter(|entry| now.duration_since(entry.last_seen) < self.session_timeout)
            .count();

        AnalyticsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            tracked_users: self.users.len(),
            active_users,
            usage,
        }
    }
}

#[async_trait]
impl Middleware for Analytics {
    fn name(&self) -> &str {
        "analytics"
    }

    async fn handle(&self, ctx: &Context, next: Next<'_>) -> Result<Outcome, HandlerError> {
        let started = Instant::now();
        let result = next.run(ctx).await;
        self.record(
            Self::usage_key(ctx),
            ctx.event().user().map(|u| u.id),
            &result,
            started.elapsed(),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Chat, Event, EventKind, Message, User};
    use crate::handler::{handler_fn, Flow};
    use crate::routing::Router;
    use std::sync::Arc;

    fn router() -> Router {
        let mut router = Router::default();
        router
            .command(
                "start",
                handler_fn(|_ctx| async {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Ok(Flow::Handled)
                }),
            )
            .unwrap();
        router
            .command(
                "fail",
                handler_fn(|_ctx| async { Err(HandlerError::transient("upstream down")) }),
            )
            .unwrap();
        router
    }

    fn ctx(router: &Router, user_id: i64, text: &str) -> Context {
        let event = Arc::new(Event::new(
            1,
            EventKind::Message(Message::text(
                1,
                Chat::private(user_id),
                User::new(user_id, "u"),
                text,
            )),
        ));
        let command = router.parse_command(&event);
        Context::new(event).with_command(command)
    }

    async fn run(analytics: &Arc<Analytics>, router: &Router, user_id: i64, text: &str) {
        let chain: Vec<Arc<dyn Middleware>> = vec![analytics.clone()];
        let _ = Next::new(&chain, router)
            .run(&ctx(router, user_id, text))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn counts_uses_failures_and_latency_per_command() {
        let analytics = Arc::new(Analytics::new(100, Duration::from_secs(60)));
        let router = router();

        run(&analytics, &router, 1, "/start").await;
        run(&analytics, &router, 1, "/start").await;
        run(&analytics, &router, 2, "/start").await;
        run(&analytics, &router, 2, "/fail").await;
        run(&analytics, &router, 3, "just text").await;

        let snapshot = analytics.snapshot();
        assert_eq!(snapshot.events, 5);
        assert_eq!(snapshot.tracked_users, 3);
        assert_eq!(snapshot.active_users, 3);

        let start = &snapshot.usage[0];
        assert_eq!(start.key, "/start");
        assert_eq!(start.uses, 3);
        assert_eq!(start.unique_users, 2);
        assert_eq!(start.success_rate, 1.0);
        assert!((start.avg_response_ms - 40.0).abs() < 1.0);

        let fail = snapshot.usage.iter().find(|u| u.key == "/fail").unwrap();
        assert_eq!(fail.failures, 1);
        assert_eq!(fail.success_rate, 0.0);

        let text = snapshot.usage.iter().find(|u| u.key == "message").unwrap();
        assert_eq!(text.uses, 1);

        let user = analytics.user_stats(2).unwrap();
        assert_eq!(user.events, 2);
        assert_eq!(user.failures, 1);
        assert_eq!(user.distinct_keys, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn user_records_stay_bounded() {
        let analytics = Arc::new(Analytics::new(2, Duration::from_secs(60)));
        let router = router();

        run(&analytics, &router, 1, "hi").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        run(&analytics, &router, 2, "hi").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        run(&analytics, &router, 3, "hi").await;

        // The least recently seen user made room.
        let snapshot = analytics.snapshot();
        assert_eq!(snapshot.tracked_users, 2);
        assert!(analytics.user_stats(1).is_none());
        assert!(analytics.user_stats(3).is_some());
        assert_eq!(snapshot.usage[0].unique_users, 3);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(analytics.snapshot().active_users, 0);
    }
}

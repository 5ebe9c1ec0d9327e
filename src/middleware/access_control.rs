//! Access control middleware.
//! Enforces user allow and block lists.

use async_trait::async_trait;
use std::collections::HashSet;

use super::{Middleware, Next};
use crate::config::AccessConfig;
use crate::handler::{Context, HandlerError, Outcome};

pub struct AccessControl {
    allowed: HashSet<i64>,
    blocked: HashSet<i64>,
}

impl AccessControl {
    pub fn new(
        allowed: impl IntoIterator<Item = i64>,
        blocked: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            blocked: blocked.into_iter().collect(),
        }
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        Self::new(
            config.allowed_users.iter().copied(),
            config.blocked_users.iter().copied(),
        )
    }

    /// Block list wins; an empty allow list admits everyone else.
    /// Events without a user pass only when no allow list is set.
    pub fn permits(&self, user_id: Option<i64>) -> bool {
        match user_id {
            Some(id) if self.blocked.contains(&id) => false,
            Some(id) => self.allowed.is_empty() || self.allowed.contains(&id),
            None => self.allowed.is_empty(),
        }
    }
}

#[async_trait]
impl Middleware for AccessControl {
    fn name(&self) -> &str {
        "access_control"
    }

    async fn handle(&self, ctx: &Context, next: Next<'_>) -> Result<Outcome, HandlerError> {
        let user_id = ctx.event().user().map(|u| u.id);
        if self.permits(user_id) {
            return next.run(ctx).await;
        }
        tracing::info!(
            user_id = ?user_id,
            sequence_id = ctx.event().sequence_id,
            "Event rejected by access control"
        );
        Ok(self.veto())
    }
}

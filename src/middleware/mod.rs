//! Middleware chain.
//!
//! # Data Flow
//! ```text
//! Worker → Next::new(chain, router).run(ctx)
//!     → chain[0].handle(ctx, next) → next.run(ctx)
//!         → chain[1].handle(ctx, next) → ...
//!             → router.dispatch(ctx) once the chain is exhausted
//!
//! A stage that returns without calling `next.run` vetoes the event.
//! ```
//!
//! # Design Decisions
//! - The continuation is a slice cursor consumed by value, so a stage can
//!   call the rest of the chain at most once
//! - Built-in stages are assembled from config; applications can push their own

pub mod access_control;
pub mod analytics;
pub mod logging;
pub mod rate_limit;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::handler::{Context, HandlerError, Outcome};
use crate::routing::Router;

pub use access_control::AccessControl;
pub use analytics::Analytics;
pub use logging::EventLogger;
pub use rate_limit::RateLimit;

/// One stage around handler execution.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Name reported in `Outcome::Vetoed`.
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &Context, next: Next<'_>) -> Result<Outcome, HandlerError>;

    /// Veto outcome attributed to this stage.
    fn veto(&self) -> Outcome {
        Outcome::Vetoed {
            middleware: self.name().to_string(),
        }
    }
}

/// The rest of the chain after the current stage.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    router: &'a Router,
}

impl<'a> Next<'a> {
    pub fn new(chain: &'a [Arc<dyn Middleware>], router: &'a Router) -> Self {
        Self { chain, router }
    }

    /// Run the remaining stages, then the router.
    pub async fn run(self, ctx: &Context) -> Result<Outcome, HandlerError> {
        match self.chain.split_first() {
            Some((stage, rest)) => {
                stage
                    .handle(
                        ctx,
                        Next {
                            chain: rest,
                            router: self.router,
                        },
                    )
                    .await
            }
            None => self.router.dispatch(ctx).await,
        }
    }
}

/// Built-in stages enabled by `config`, outermost first.
///
/// `Analytics` is left out: the dispatcher builder installs it so it can
/// keep a handle for snapshots.
pub fn from_config(config: &RuntimeConfig) -> Vec<Arc<dyn Middleware>> {
    let mut chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(EventLogger)];
    if config.access.is_active() {
        chain.push(Arc::new(AccessControl::from_config(&config.access)));
    }
    if config.rate_limit.enabled {
        chain.push(Arc::new(RateLimit::from_config(&config.rate_limit)));
    }
    chain
}

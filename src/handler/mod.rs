//! Handler contract.
//!
//! # Data Flow
//! ```text
//! Router resolves ordered routes
//!     → Handler::handle(Context) for each route, in order
//!     → Flow decides whether the next matching route runs
//!     → HandlerError (Transient | Permanent) drives the WorkItem state machine
//! ```

pub mod context;
pub mod error;

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;

pub use context::Context;
pub use error::HandlerError;

/// Propagation decision returned by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Apply the router's configured propagation (first match wins or run all).
    Handled,
    /// Let the next matching route run regardless of configuration.
    Continue,
    /// Claim exclusivity: no further route runs for this event.
    Stop,
}

pub type HandlerResult = Result<Flow, HandlerError>;

/// Result of running one WorkItem through the middleware chain and router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// At least one handler ran to completion.
    Handled { handlers: usize },
    /// No route matched. Not an error.
    NoMatch,
    /// A middleware stage did not call `next`.
    Vetoed { middleware: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Handled { .. } => "handled",
            Outcome::NoMatch => "no_match",
            Outcome::Vetoed { .. } => "vetoed",
        }
    }
}

/// Application logic bound to a route.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, ctx: Context) -> HandlerResult;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` so it can be registered on a router.
///
/// ```rust,ignore
/// router.command("start", handler_fn(|ctx: Context| async move {
///     ctx.reply("hello").await?;
///     Ok(Flow::Handled)
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: Context) -> HandlerResult {
        (self.f)(ctx).await
    }
}

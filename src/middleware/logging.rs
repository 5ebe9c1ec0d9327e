//! Event logging middleware.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::Instrument;

use super::{Middleware, Next};
use crate::handler::{Context, HandlerError, Outcome};

/// Opens a span per event and logs the outcome with its latency.
pub struct EventLogger;

#[async_trait]
impl Middleware for EventLogger {
    fn name(&self) -> &str {
        "event_logger"
    }

    async fn handle(&self, ctx: &Context, next: Next<'_>) -> Result<Outcome, HandlerError> {
        let event = ctx.event();
        let span = tracing::info_span!(
            "event",
            sequence_id = event.sequence_id,
            kind = %event.update_kind(),
            chat_id = event.chat().map(|c| c.id),
            user_id = event.user().map(|u| u.id),
            attempt = ctx.attempt(),
        );

        async move {
            let started = Instant::now();
            let result = next.run(ctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(outcome) => {
                    tracing::info!(outcome = outcome.label(), elapsed_ms, "Event processed")
                }
                Err(e) => tracing::warn!(error = %e, elapsed_ms, "Event failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

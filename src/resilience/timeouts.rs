//! Timeout enforcement.
//!
//! # Responsibilities
//! - Carry one overall deadline through acquire, call and retry sleeps
//! - Cancel operations cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Deadlines are absolute instants so nested steps share one budget

use std::future::Future;
use std::time::Duration;
use tokio::time::{error::Elapsed, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Whether waiting `delay` would still leave time before the deadline.
    pub fn allows(&self, delay: Duration) -> bool {
        Instant::now() + delay < self.0
    }

    /// Run `fut`, abandoning it when the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        tokio::time::timeout_at(self.0, fut).await
    }
}

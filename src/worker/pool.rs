//! Worker pool.
//!
//! # Responsibilities
//! - Run N worker loops pulling from the shared work queue
//! - Execute each item in isolation so a panic never takes a worker down
//! - Drive the item state machine: completed, retried, or dead-lettered
//! - Stop with or without draining, surfacing every abandoned item
//!
//! # Design Decisions
//! - Each item runs in its own spawned task; the worker awaits the join
//!   handle and turns a panic into a dead letter
//! - The pool keeps an abort handle per running item, so a forced stop
//!   cancels the handler itself and not only the worker awaiting it
//! - Workers never share an item; the queue hands each one to exactly one
//! - Retry delay is applied by the queue, so workers never sleep on backoff

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;
use uuid::Uuid;

use super::dead_letter::{DeadLetterEntry, DeadLetterStore, FailureReason};
use super::item::WorkItem;
use super::queue::{SubmitError, WorkQueue};
use crate::handler::{HandlerError, Outcome};
use crate::observability::metrics;
use crate::resilience::retries::RetryPolicy;

/// What a worker does with one item: middleware, routing, handlers.
#[async_trait]
pub trait Process: Send + Sync + 'static {
    async fn process(&self, item: &WorkItem) -> Result<Outcome, HandlerError>;
}

/// Monotonic counters plus the in-flight gauge.
#[derive(Debug, Default)]
pub struct WorkerStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    handled: AtomicU64,
    unmatched: AtomicU64,
    vetoed: AtomicU64,
    failed_attempts: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    in_flight: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    /// Items that completed with at least one handler run.
    pub handled: u64,
    pub unmatched: u64,
    pub vetoed: u64,
    /// Failed attempts, whether or not they were retried.
    pub failed_attempts: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub in_flight: u64,
}

impl WorkerStatsSnapshot {
    /// Items that reached a final state without being dead-lettered.
    pub fn processed(&self) -> u64 {
        self.handled + self.unmatched + self.vetoed
    }
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            vetoed: self.vetoed.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Result of [`WorkerPool::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub drained: bool,
    /// Items dead-lettered as abandoned by this stop.
    pub abandoned: usize,
    /// Workers still busy at the shutdown deadline, then aborted.
    pub aborted_workers: usize,
}

/// An item a worker is running, with the handle that cancels its task.
struct Held {
    item: WorkItem,
    task: AbortHandle,
}

enum Attempt {
    Done(Result<Outcome, HandlerError>),
    Panicked(String),
    /// Aborted by a forced stop, which has already surfaced the item.
    Cancelled,
}

pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    dead_letters: Arc<DeadLetterStore>,
    retry: RetryPolicy,
    stats: Arc<WorkerStats>,
    shutdown_timeout: Duration,
    workers: Mutex<JoinSet<()>>,
    /// Items currently held by a worker, surfaced if that worker is aborted.
    held: Arc<DashMap<Uuid, Held>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<WorkQueue>,
        dead_letters: Arc<DeadLetterStore>,
        retry: RetryPolicy,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            retry,
            stats: Arc::new(WorkerStats::default()),
            shutdown_timeout,
            workers: Mutex::new(JoinSet::new()),
            held: Arc::new(DashMap::new()),
        }
    }

    /// Launch `count` workers. Calling again adds more.
    pub fn start(&self, count: usize, processor: Arc<dyn Process>) {
        let mut workers = self.workers.lock();
        for worker_id in 0..count {
            let worker = Worker {
                id: worker_id,
                queue: self.queue.clone(),
                dead_letters: self.dead_letters.clone(),
                retry: self.retry,
                stats: self.stats.clone(),
                processor: processor.clone(),
                held: self.held.clone(),
            };
            workers.spawn(worker.run());
        }
        tracing::info!(workers = count, "Worker pool started");
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Admit an item, counting the submission or its rejection.
    pub async fn submit(&self, item: WorkItem) -> Result<(), SubmitError> {
        let priority = item.priority;
        match self.queue.push(item).await {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                metrics::record_submitted(priority);
                metrics::set_queue_depth(self.queue.depth());
                Ok(())
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_rejected(e.label());
                Err(e)
            }
        }
    }

    /// Stop the pool.
    ///
    /// `drain` finishes in-flight and queued items first; otherwise queued
    /// items are dead-lettered as abandoned and only in-flight items finish.
    /// Either way workers get the shutdown timeout, then are aborted.
    pub async fn stop(&self, drain: bool) -> ShutdownReport {
        let mut abandoned = self.abandon(self.queue.close(!drain));

        let mut workers = std::mem::take(&mut *self.workers.lock());
        let joined = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Worker task ended abnormally");
                }
            }
        })
        .await;

        let aborted_workers = if joined.is_err() {
            let remaining = workers.len();
            tracing::warn!(
                remaining,
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Workers did not finish before the shutdown timeout"
            );
            // Cancel the handlers before their workers so no abandoned item
            // finishes after it has been dead-lettered.
            let held: Vec<WorkItem> = self
                .held
                .iter()
                .map(|entry| {
                    entry.task.abort();
                    entry.item.clone()
                })
                .collect();
            self.held.clear();
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            abandoned += self.abandon(held);
            remaining
        } else {
            0
        };
        // Anything still queued (no workers, or aborted ones) will never run.
        let leftover = self.abandon(self.queue.close(true));
        abandoned += leftover;

        tracing::info!(drain, abandoned, aborted_workers, "Worker pool stopped");
        ShutdownReport {
            drained: drain && aborted_workers == 0 && leftover == 0,
            abandoned,
            aborted_workers,
        }
    }

    fn abandon(&self, items: Vec<WorkItem>) -> usize {
        let count = items.len();
        for item in items {
            self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
            self.dead_letters
                .record(DeadLetterEntry::new(&item, FailureReason::Abandoned));
        }
        count
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterStore> {
        &self.dead_letters
    }
}

struct Worker {
    id: usize,
    queue: Arc<WorkQueue>,
    dead_letters: Arc<DeadLetterStore>,
    retry: RetryPolicy,
    stats: Arc<WorkerStats>,
    processor: Arc<dyn Process>,
    held: Arc<DashMap<Uuid, Held>>,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(worker = self.id, "Worker started");
        while let Some(item) = self.queue.pop().await {
            let in_flight = self.stats.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::set_in_flight(in_flight);
            metrics::set_queue_depth(self.queue.depth());

            let started = Instant::now();
            let attempt = self.execute(&item).await;
            self.held.remove(&item.id);
            self.settle(item, attempt, started.elapsed());

            self.queue.finish();
            let in_flight = self.stats.in_flight.fetch_sub(1, Ordering::Relaxed) - 1;
            metrics::set_in_flight(in_flight);
        }
        tracing::debug!(worker = self.id, "Worker exiting");
    }

    async fn execute(&self, item: &WorkItem) -> Attempt {
        let processor = self.processor.clone();
        let owned = item.clone();
        let task = tokio::spawn(async move { processor.process(&owned).await });
        self.held.insert(
            item.id,
            Held {
                item: item.clone(),
                task: task.abort_handle(),
            },
        );
        match task.await {
            Ok(result) => Attempt::Done(result),
            Err(e) if e.is_panic() => Attempt::Panicked(panic_message(e.into_panic())),
            Err(_) => Attempt::Cancelled,
        }
    }

    fn settle(&self, item: WorkItem, attempt: Attempt, elapsed: Duration) {
        let error = match attempt {
            Attempt::Done(Ok(outcome)) => {
                let counter = match outcome {
                    Outcome::Handled { .. } => &self.stats.handled,
                    Outcome::NoMatch => &self.stats.unmatched,
                    Outcome::Vetoed { .. } => &self.stats.vetoed,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                metrics::record_processed(outcome.label(), elapsed);
                tracing::debug!(
                    worker = self.id,
                    work_item_id = %item.id,
                    sequence_id = item.event.sequence_id,
                    outcome = outcome.label(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Work item completed"
                );
                return;
            }
            Attempt::Done(Err(e)) => e,
            Attempt::Cancelled => {
                tracing::debug!(worker = self.id, work_item_id = %item.id, "Work item cancelled");
                return;
            }
            Attempt::Panicked(message) => {
                tracing::error!(
                    worker = self.id,
                    work_item_id = %item.id,
                    panic = %message,
                    "Handler panicked"
                );
                self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                metrics::record_processed("panicked", elapsed);
                self.dead_letter(&item, FailureReason::Panicked { message });
                return;
            }
        };

        self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::record_handler_failure(error.is_transient());
        metrics::record_processed("failed", elapsed);

        if !error.is_transient() {
            self.dead_letter(
                &item,
                FailureReason::Permanent {
                    error: error.to_string(),
                },
            );
            return;
        }

        if !self.retry.allows_retry(item.retry_count) {
            self.dead_letter(
                &item,
                FailureReason::RetriesExhausted {
                    error: error.to_string(),
                },
            );
            return;
        }

        let retry = item.into_retry();
        let delay = self.retry.backoff(retry.retry_count);
        tracing::warn!(
            worker = self.id,
            work_item_id = %retry.id,
            retry = retry.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying"
        );
        match self.queue.requeue_after(retry, delay) {
            Ok(()) => {
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                metrics::record_retry();
            }
            Err(item) => self.dead_letter(&item, FailureReason::Abandoned),
        }
    }

    fn dead_letter(&self, item: &WorkItem, reason: FailureReason) {
        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.dead_letters.record(DeadLetterEntry::new(item, reason));
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

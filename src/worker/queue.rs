//! Bounded priority work queue.
//!
//! # Responsibilities
//! - Admission control: the single point where submissions wait or are refused
//! - Dequeue the highest-priority ready item, FIFO within a priority
//! - Hold retried items invisible until their backoff elapses
//! - Surface queued items on a discarding shutdown instead of dropping them
//!
//! # Design Decisions
//! - Capacity is a semaphore of submission slots; a slot is freed when its
//!   item is dequeued, not when it finishes
//! - Retries re-enter without taking a slot, so a full queue can never
//!   deadlock a worker that is trying to requeue
//! - One mutex guards both heaps; critical sections never await

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio::time::Instant;

use super::item::WorkItem;
use crate::config::{BackpressureMode, WorkerConfig};

/// Admission failure, surfaced synchronously to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("work queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

impl SubmitError {
    pub fn label(&self) -> &'static str {
        match self {
            SubmitError::QueueFull { .. } => "queue_full",
            SubmitError::ShuttingDown => "shutting_down",
        }
    }
}

struct Ready {
    priority: u8,
    seq: u64,
    holds_slot: bool,
    item: WorkItem,
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ready {}

struct Delayed {
    due: Instant,
    seq: u64,
    item: WorkItem,
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap inverted: earliest due first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Delayed {}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Delayed>,
    next_seq: u64,
    /// Items handed to a worker and not yet finished.
    active: usize,
    closed: bool,
    discarding: bool,
}

impl QueueState {
    fn push_ready(&mut self, item: WorkItem, holds_slot: bool) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.push(Ready {
            priority: item.priority,
            seq,
            holds_slot,
            item,
        });
    }

    fn push_delayed(&mut self, item: WorkItem, due: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.push(Delayed { due, seq, item });
    }

    /// Move every delayed item whose backoff has elapsed into the ready heap.
    fn promote_due(&mut self, now: Instant) {
        while self.delayed.peek().is_some_and(|d| d.due <= now) {
            if let Some(due) = self.delayed.pop() {
                self.push_ready(due.item, false);
            }
        }
    }

    fn exhausted(&self) -> bool {
        self.closed
            && self.ready.is_empty()
            && self.delayed.is_empty()
            && (self.discarding || self.active == 0)
    }
}

pub struct WorkQueue {
    capacity: usize,
    mode: BackpressureMode,
    submit_timeout: Duration,
    slots: Semaphore,
    state: Mutex<QueueState>,
    available: Notify,
}

impl WorkQueue {
    pub fn new(capacity: usize, mode: BackpressureMode, submit_timeout: Duration) -> Self {
        Self {
            capacity,
            mode,
            submit_timeout,
            slots: Semaphore::new(capacity),
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.queue_capacity,
            config.backpressure,
            config.submit_timeout(),
        )
    }

    /// Admit a new item.
    ///
    /// In `Block` mode this waits up to the submit timeout for a slot; in
    /// `Reject` mode a full queue fails immediately.
    pub async fn push(&self, item: WorkItem) -> Result<(), SubmitError> {
        let permit = match self.mode {
            BackpressureMode::Reject => match self.slots.try_acquire() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    return Err(SubmitError::QueueFull {
                        capacity: self.capacity,
                    })
                }
                Err(TryAcquireError::Closed) => return Err(SubmitError::ShuttingDown),
            },
            BackpressureMode::Block => {
                match tokio::time::timeout(self.submit_timeout, self.slots.acquire()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(SubmitError::ShuttingDown),
                    Err(_) => {
                        return Err(SubmitError::QueueFull {
                            capacity: self.capacity,
                        })
                    }
                }
            }
        };

        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SubmitError::ShuttingDown);
            }
            state.push_ready(item, true);
        }
        // The slot now belongs to the queued item and comes back on dequeue.
        permit.forget();
        self.available.notify_one();
        Ok(())
    }

    /// Wait for the next ready item.
    ///
    /// Returns `None` once the queue is closed and nothing is left to hand
    /// out. A draining close also waits for active items, since they may
    /// still be requeued.
    pub async fn pop(&self) -> Option<WorkItem> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.state.lock();
                state.promote_due(Instant::now());
                if let Some(ready) = state.ready.pop() {
                    state.active += 1;
                    let more = !state.ready.is_empty();
                    drop(state);
                    if ready.holds_slot {
                        self.slots.add_permits(1);
                    }
                    if more {
                        self.available.notify_one();
                    }
                    return Some(ready.item);
                }
                if state.exhausted() {
                    return None;
                }
                state.delayed.peek().map(|d| d.due)
            };

            match next_due {
                Some(due) => {
                    let _ = tokio::time::timeout_at(due, notified).await;
                }
                None => notified.await,
            }
        }
    }

    /// Mark an item returned by [`pop`](Self::pop) as settled.
    pub fn finish(&self) {
        let wake = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            state.exhausted()
        };
        if wake {
            self.available.notify_waiters();
        }
    }

    /// Put a failed item back, invisible for `delay`.
    ///
    /// Fails with the item when the queue is discarding, so the caller can
    /// surface it instead of losing it.
    pub fn requeue_after(&self, item: WorkItem, delay: Duration) -> Result<(), WorkItem> {
        {
            let mut state = self.state.lock();
            if state.discarding {
                return Err(item);
            }
            if delay.is_zero() {
                state.push_ready(item, false);
            } else {
                state.push_delayed(item, Instant::now() + delay);
            }
        }
        self.available.notify_one();
        Ok(())
    }

    /// Stop admitting new items.
    ///
    /// With `discard`, every queued item (ready or delayed) is removed and
    /// returned; otherwise workers keep draining until the queue is empty.
    pub fn close(&self, discard: bool) -> Vec<WorkItem> {
        self.slots.close();
        let abandoned = {
            let mut state = self.state.lock();
            state.closed = true;
            if discard {
                state.discarding = true;
                let mut ready = std::mem::take(&mut state.ready).into_sorted_vec();
                ready.reverse();
                let delayed = std::mem::take(&mut state.delayed).into_sorted_vec();
                ready
                    .into_iter()
                    .map(|r| r.item)
                    .chain(delayed.into_iter().rev().map(|d| d.item))
                    .collect()
            } else {
                Vec::new()
            }
        };
        self.available.notify_waiters();
        abandoned
    }

    /// Queued items, including retries waiting out their backoff.
    pub fn depth(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }

    /// Retries waiting out their backoff.
    pub fn delayed(&self) -> usize {
        self.state.lock().delayed.len()
    }

    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

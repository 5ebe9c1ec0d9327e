//! Dead letter store.
//!
//! # Responsibilities
//! - Record every work item that failed permanently, exhausted its retries,
//!   panicked, or was abandoned by a discarding shutdown
//! - Optionally mirror entries to a JSON-lines journal for offline replay
//!
//! # Design Decisions
//! - Append-only; only `take_all` removes entries (for replay)
//! - Journal write failures are logged, the in-memory entry is still kept

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use uuid::Uuid;

use super::item::WorkItem;
use crate::config::DeadLetterConfig;
use crate::event::Event;

/// Why an item ended up in the dead letter store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// A handler reported a non-retryable error.
    Permanent { error: String },
    /// A transient error persisted past the retry budget.
    RetriesExhausted { error: String },
    /// The handler task panicked.
    Panicked { message: String },
    /// Still queued, or mid-retry, when the dispatcher stopped without draining.
    Abandoned,
}

impl FailureReason {
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::Permanent { .. } => "permanent",
            FailureReason::RetriesExhausted { .. } => "retries_exhausted",
            FailureReason::Panicked { .. } => "panicked",
            FailureReason::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub work_item_id: Uuid,
    pub event: Event,
    pub priority: u8,
    pub failure_reason: FailureReason,
    pub retry_count_at_failure: u32,
    pub failed_at: SystemTime,
}

impl DeadLetterEntry {
    pub fn new(item: &WorkItem, failure_reason: FailureReason) -> Self {
        Self {
            work_item_id: item.id,
            event: (*item.event).clone(),
            priority: item.priority,
            failure_reason,
            retry_count_at_failure: item.retry_count,
            failed_at: SystemTime::now(),
        }
    }
}

pub struct DeadLetterStore {
    entries: Mutex<Vec<DeadLetterEntry>>,
    journal: Option<Mutex<File>>,
    total: AtomicU64,
}

impl DeadLetterStore {
    /// Store that keeps entries in memory only.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            journal: None,
            total: AtomicU64::new(0),
        }
    }

    /// Store that also appends every entry to `path` as one JSON line.
    pub fn with_journal(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            journal: Some(Mutex::new(file)),
            ..Self::in_memory()
        })
    }

    pub fn from_config(config: &DeadLetterConfig) -> io::Result<Self> {
        match &config.path {
            Some(path) => Self::with_journal(path),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn record(&self, entry: DeadLetterEntry) {
        tracing::warn!(
            work_item_id = %entry.work_item_id,
            sequence_id = entry.event.sequence_id,
            reason = entry.failure_reason.label(),
            retries = entry.retry_count_at_failure,
            "Work item dead-lettered"
        );
        crate::observability::metrics::record_dead_letter(entry.failure_reason.label());

        if let Some(journal) = &self.journal {
            if let Err(e) = append_line(&mut journal.lock(), &entry) {
                tracing::error!(
                    work_item_id = %entry.work_item_id,
                    error = %e,
                    "Failed to journal dead letter"
                );
            }
        }

        self.total.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(entry);
    }

    /// Put back an entry taken for replay that could not be resubmitted.
    /// Not journaled or counted again.
    pub fn restore(&self, entry: DeadLetterEntry) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().clone()
    }

    /// Remove and return every held entry.
    pub fn take_all(&self) -> Vec<DeadLetterEntry> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries ever recorded, including ones since taken for replay.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for DeadLetterStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn append_line(file: &mut File, entry: &DeadLetterEntry) -> io::Result<()> {
    serde_json::to_writer(&mut *file, entry)?;
    file.write_all(b"\n")?;
    file.flush()
}

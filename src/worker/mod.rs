//! Worker subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher::submit
//!     → queue.rs (admission: block with timeout, or reject when full)
//!     → priority heap (priority desc, FIFO within a priority)
//!     → pool.rs worker loop pops one item
//!         → Process::process (middleware → router → handlers), in its own task
//!         → Ok: completed
//!         → Transient error: requeued with backoff delay (retry_count + 1)
//!         → Permanent error, panic, or retries exhausted: dead_letter.rs
//! ```
//!
//! # Design Decisions
//! - Every dequeue ends in completion, requeue, or a dead letter
//! - A discarding stop turns queued items into `Abandoned` dead letters
//! - No ordering between items of the same chat beyond priority + FIFO

pub mod dead_letter;
pub mod item;
pub mod pool;
pub mod queue;

pub use dead_letter::{DeadLetterEntry, DeadLetterStore, FailureReason};
pub use item::WorkItem;
pub use pool::{Process, ShutdownReport, WorkerPool, WorkerStatsSnapshot};
pub use queue::{SubmitError, WorkQueue};

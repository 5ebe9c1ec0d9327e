//! Dispatch pipeline.
//!
//! # Data Flow
//! ```text
//! Ingestion (external)
//!     → Dispatcher::submit(Event)
//!         → priority tier from event kind (commands get their own tier)
//!         → WorkerPool::submit (admission control)
//!     → worker picks the item
//!         → pipeline.rs builds a Context (command, attempt, API, storage)
//!         → middleware chain → Router::dispatch → handlers
//!     → outcome counted, retried, or dead-lettered
//! ```
//!
//! # Design Decisions
//! - The router is built before the dispatcher and is read-only afterwards
//! - No process-wide registry: several dispatchers can live in one process
//! - Ingestion may acknowledge an event as soon as `submit` returns `Ok`

pub mod dispatcher;
pub mod pipeline;

pub use dispatcher::{Accepted, Dispatcher, DispatcherBuilder, ReplayReport, RuntimeSnapshot};
pub use pipeline::Pipeline;

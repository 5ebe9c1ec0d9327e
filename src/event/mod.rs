//! Inbound event model.
//!
//! # Data Flow
//! ```text
//! Ingestion (long-poll / webhook, external)
//!     → converts platform payloads into Event
//!     → Dispatcher::submit(Event)
//!     → Event wrapped in Arc, shared read-only by every WorkItem built from it
//! ```
//!
//! # Design Decisions
//! - Events are immutable once built; no `&mut` accessors are exposed
//! - `sequence_id` comes from the platform (update id) and only grows
//! - Payload shape is the minimum the router and filters need

pub mod types;

pub use types::{
    CallbackQuery, Chat, ChatKind, ChatMemberUpdate, Event, EventKind, InlineQuery, MediaKind,
    Message, UpdateKind, User,
};

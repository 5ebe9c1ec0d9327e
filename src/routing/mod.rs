//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Event (from a WorkItem)
//!     → command.rs (parse `/name@bot args` when the text is a command)
//!     → trie.rs (exact, case-folded command lookup)
//!     → filter.rs (evaluate each filter route's expression)
//!     → router.rs (ordered route list, handler invocation)
//!     → Return: Outcome (handled / no match)
//!
//! Registration (before workers start):
//!     Pattern::Command → trie node, sorted by priority
//!     Pattern::Regex   → compiled via regex_cache.rs, stored as a filter route
//!     Pattern::Filter  → priority-sorted filter route list
//! ```
//!
//! # Design Decisions
//! - Command matches always come before filter matches
//! - Deterministic: same event always resolves to the same ordered routes
//! - Filters are plain values composed with `&`, `|` and `!`

pub mod command;
pub mod filter;
pub mod filters;
pub mod regex_cache;
pub mod router;
pub mod trie;

pub use command::{CommandParser, ParsedCommand};
pub use filter::Filter;
pub use regex_cache::RegexCache;
pub use router::{Pattern, Route, Router, RouterError};

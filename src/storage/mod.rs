//! Scoped key-value storage for handler state.
//!
//! # Responsibilities
//! - Persist small JSON values per user or per chat
//! - Back conversation (finite-state) tracking via [`STATE_KEY`]
//! - Expire entries after an optional TTL
//!
//! # Design Decisions
//! - The trait is async so networked backends can implement it without
//!   blocking workers; [`MemoryStore`] is the in-process implementation
//! - Values are `serde_json::Value` so handlers store typed data through serde

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub use memory::MemoryStore;

/// Key reserved for the conversation state of a scope.
pub const STATE_KEY: &str = "__fsm_state";

/// Namespace a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Scope {
    User(i64),
    Chat(i64),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::User(id) => write!(f, "user:{id}"),
            Scope::Chat(id) => write!(f, "chat:{id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, scope: Scope, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(
        &self,
        scope: Scope,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    async fn delete(&self, scope: Scope, key: &str) -> Result<(), StorageError>;

    /// Remove every key in `scope`.
    async fn clear(&self, scope: Scope) -> Result<(), StorageError>;
}

//! Bounded cache of compiled regular expressions.
//!
//! # Design Decisions
//! - Patterns compile once; later lookups share the same `Arc<Regex>`
//! - Least-recently-used entry is evicted when the cache is full
//! - Compilation happens outside the lock

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_CAPACITY: usize = 256;

struct CachedRegex {
    regex: Arc<Regex>,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedRegex>,
    tick: u64,
}

pub struct RegexCache {
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RegexCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Compiled form of `pattern`, compiling and caching it on first use.
    pub fn get(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.tick += 1;
            if let Some(entry) = state.entries.get_mut(pattern) {
                entry.last_used = state.tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.regex.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let compiled = Arc::new(Regex::new(pattern)?);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.tick += 1;
        let tick = state.tick;

        if !state.entries.contains_key(pattern) && state.entries.len() >= self.capacity {
            let victim = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                state.entries.remove(&victim);
            }
        }

        let entry = state
            .entries
            .entry(pattern.to_string())
            .or_insert(CachedRegex {
                regex: compiled,
                last_used: tick,
            });
        entry.last_used = tick;
        Ok(entry.regex.clone())
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.state.lock().entries.contains_key(pattern)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

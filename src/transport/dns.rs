//! Resolved-address cache.
//!
//! Lookups are reused until their TTL runs out. A failed connect invalidates
//! the entry so the next session re-resolves.

use async_trait::async_trait;
use dashmap::DashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system.
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

struct CachedLookup {
    addrs: Arc<[SocketAddr]>,
    expires_at: Instant,
}

pub struct DnsCache {
    ttl: Duration,
    resolver: Arc<dyn Resolver>,
    entries: DashMap<(String, u16), CachedLookup>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DnsCache {
    pub fn new(ttl: Duration, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            ttl,
            resolver,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn system(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(SystemResolver))
    }

    pub async fn lookup(&self, host: &str, port: u16) -> io::Result<Arc<[SocketAddr]>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(Arc::from(vec![SocketAddr::new(ip, port)]));
        }

        let key = (host.to_ascii_lowercase(), port);
        if let Some(cached) = self.entries.get(&key) {
            if cached.expires_at > Instant::now() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&cached.addrs));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let addrs = self.resolver.resolve(host, port).await?;
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses for {host}"),
            ));
        }
        let addrs: Arc<[SocketAddr]> = Arc::from(addrs);
        tracing::debug!(host, port, count = addrs.len(), "Resolved upstream host");
        self.entries.insert(
            key,
            CachedLookup {
                addrs: Arc::clone(&addrs),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(addrs)
    }

    pub fn invalidate(&self, host: &str, port: u16) {
        self.entries.remove(&(host.to_ascii_lowercase(), port));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

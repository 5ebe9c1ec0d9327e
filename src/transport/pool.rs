//! Outbound connection pool.
//!
//! # Responsibilities
//! - Open sessions lazily, up to `max_connections` across all endpoints
//! - Multiplex up to `max_streams_per_session` concurrent calls per session
//! - Keep at most `max_keepalive` idle sessions; close idle ones after `keepalive_expiry`
//! - Gate every call through the endpoint's circuit breaker
//! - Retry transient failures with backoff inside one overall deadline
//!
//! # Design Decisions
//! - Pool bookkeeping sits behind one short-held lock; no I/O under the lock
//! - Waiters register for release notifications before inspecting state
//! - A dropped [`Lease`] returns its session and abandons its breaker permit
//! - Connection failures mark the session broken; it is closed once idle

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use parking_lot::Mutex;

use super::connector::{ApiRequest, ApiResponse, Connector, Session};
use super::dns::DnsCache;
use super::{Endpoint, TransportError};
use crate::config::{CircuitBreakerConfig, ConnectionPoolConfig};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{
    CallPermit, CircuitBreakers, CircuitSnapshot, CircuitState,
};
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::Deadline;

struct PooledSession {
    id: u64,
    endpoint: Endpoint,
    session: Arc<dyn Session>,
    last_used_at: Instant,
    in_flight: usize,
    broken: bool,
}

impl PooledSession {
    fn usable_for(&self, endpoint: &Endpoint, max_streams: usize) -> bool {
        self.endpoint == *endpoint
            && !self.broken
            && self.in_flight < max_streams
            && self.session.is_healthy()
    }
}

#[derive(Default)]
struct PoolState {
    sessions: Vec<PooledSession>,
    connecting: usize,
    next_id: u64,
    closed: bool,
}

impl PoolState {
    fn open_count(&self) -> usize {
        self.sessions.len() + self.connecting
    }

    fn idle_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.in_flight == 0).count()
    }

    /// Remove idle sessions that are broken, unhealthy or past their expiry.
    fn take_expired(&mut self, now: Instant, expiry: Duration) -> Vec<Arc<dyn Session>> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.sessions.len() {
            let s = &self.sessions[i];
            let stale = s.in_flight == 0
                && (s.broken
                    || !s.session.is_healthy()
                    || now.duration_since(s.last_used_at) >= expiry);
            if stale {
                expired.push(self.sessions.swap_remove(i).session);
            } else {
                i += 1;
            }
        }
        expired
    }

    /// Remove the least recently used idle session.
    fn take_idle_lru(&mut self) -> Option<Arc<dyn Session>> {
        let idx = self
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.in_flight == 0)
            .min_by_key(|(_, s)| s.last_used_at)
            .map(|(i, _)| i)?;
        Some(self.sessions.swap_remove(idx).session)
    }
}

#[derive(Default)]
struct PoolCounters {
    calls: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    circuit_rejections: AtomicU64,
    exhausted: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub sessions: usize,
    pub idle_sessions: usize,
    pub in_flight_calls: usize,
    pub connecting: usize,
    pub max_connections: usize,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub calls: u64,
    pub failures: u64,
    pub retries: u64,
    pub circuit_rejections: u64,
    pub exhausted: u64,
    pub cached_hosts: usize,
    pub circuits: Vec<CircuitSnapshot>,
}

enum Step {
    Reuse { id: u64, session: Arc<dyn Session> },
    Connect,
    Evicted(Arc<dyn Session>),
    Wait,
}

pub struct ConnectionPool {
    config: ConnectionPoolConfig,
    retry: RetryPolicy,
    connector: Arc<dyn Connector>,
    dns: DnsCache,
    breakers: CircuitBreakers,
    state: Mutex<PoolState>,
    released: Notify,
    counters: PoolCounters,
}

impl ConnectionPool {
    pub fn new(
        config: ConnectionPoolConfig,
        breaker_config: CircuitBreakerConfig,
        retry: RetryPolicy,
        connector: Arc<dyn Connector>,
        dns: DnsCache,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            retry,
            connector,
            dns,
            breakers: CircuitBreakers::new(breaker_config),
            state: Mutex::new(PoolState::default()),
            released: Notify::new(),
            counters: PoolCounters::default(),
        })
    }

    /// Concurrent calls one session may carry.
    pub fn streams_per_session(&self) -> usize {
        if self.connector.multiplexes() {
            self.config.max_streams_per_session.max(1)
        } else {
            1
        }
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub fn circuit_state(&self, endpoint: &Endpoint) -> CircuitState {
        self.breakers.state(&endpoint.to_string())
    }

    /// Lease a session to `endpoint`.
    ///
    /// Fails fast with `CircuitOpen` while the endpoint's circuit is open, and
    /// with `PoolExhausted` when no session frees up within `acquire_timeout`.
    pub async fn acquire(self: &Arc<Self>, endpoint: &Endpoint) -> Result<Lease, TransportError> {
        let permit = self
            .breakers
            .get(&endpoint.to_string())
            .try_acquire()
            .map_err(|e| {
                self.counters.circuit_rejections.fetch_add(1, Ordering::Relaxed);
                TransportError::CircuitOpen(e)
            })?;

        let started = Instant::now();
        let give_up_at = started + self.config.acquire_timeout();
        let max_streams = self.streams_per_session();

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (step, expired) = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(TransportError::PoolClosed);
                }
                let now = Instant::now();
                let expired = state.take_expired(now, self.config.keepalive_expiry());

                let reusable = state
                    .sessions
                    .iter_mut()
                    .filter(|s| s.usable_for(endpoint, max_streams))
                    .min_by_key(|s| s.in_flight);
                let step = if let Some(s) = reusable {
                    s.in_flight += 1;
                    s.last_used_at = now;
                    Step::Reuse {
                        id: s.id,
                        session: Arc::clone(&s.session),
                    }
                } else if state.open_count() < self.config.max_connections {
                    state.connecting += 1;
                    Step::Connect
                } else if let Some(idle) = state.take_idle_lru() {
                    Step::Evicted(idle)
                } else {
                    Step::Wait
                };
                (step, expired)
            };
            for session in expired {
                self.close_detached(session);
            }

            match step {
                Step::Reuse { id, session } => {
                    return Ok(Lease::new(Arc::clone(self), endpoint.clone(), id, session, permit));
                }
                Step::Connect => {
                    let slot = ConnectSlot { pool: self };
                    let opened = self.open_session(endpoint).await;
                    let session = match opened {
                        Ok(session) => session,
                        Err(e) => {
                            drop(slot);
                            if e.counts_against_circuit() {
                                permit.failure();
                            }
                            return Err(e);
                        }
                    };

                    let id = {
                        let mut state = self.state.lock();
                        if state.closed {
                            None
                        } else {
                            let id = state.next_id;
                            state.next_id += 1;
                            state.sessions.push(PooledSession {
                                id,
                                endpoint: endpoint.clone(),
                                session: Arc::clone(&session),
                                last_used_at: Instant::now(),
                                in_flight: 1,
                                broken: false,
                            });
                            Some(id)
                        }
                    };
                    drop(slot);
                    let Some(id) = id else {
                        self.close_detached(session);
                        return Err(TransportError::PoolClosed);
                    };
                    return Ok(Lease::new(Arc::clone(self), endpoint.clone(), id, session, permit));
                }
                Step::Evicted(idle) => {
                    tracing::debug!(endpoint = %endpoint, "Evicting idle session to make room");
                    self.close_detached(idle);
                }
                Step::Wait => {
                    if tokio::time::timeout_at(give_up_at, notified).await.is_err() {
                        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                        return Err(TransportError::PoolExhausted {
                            endpoint: endpoint.to_string(),
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }
    }

    async fn open_session(&self, endpoint: &Endpoint) -> Result<Arc<dyn Session>, TransportError> {
        let failure = |reason: String| TransportError::ConnectionFailure {
            endpoint: endpoint.to_string(),
            reason,
        };

        let addrs = self
            .dns
            .lookup(&endpoint.host, endpoint.port)
            .await
            .map_err(|e| failure(format!("resolve failed: {e}")))?;
        let addr = addrs
            .first()
            .copied()
            .ok_or_else(|| failure("no addresses".to_string()))?;

        let connect = self.connector.connect(endpoint, addr);
        match tokio::time::timeout(self.config.connect_timeout(), connect).await {
            Ok(Ok(session)) => {
                self.counters.sessions_opened.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(endpoint = %endpoint, %addr, "Opened upstream session");
                Ok(session)
            }
            Ok(Err(e)) => {
                self.dns.invalidate(&endpoint.host, endpoint.port);
                Err(e)
            }
            Err(_) => {
                self.dns.invalidate(&endpoint.host, endpoint.port);
                Err(TransportError::Timeout {
                    endpoint: endpoint.to_string(),
                })
            }
        }
    }

    /// Return a lease, reporting the call outcome to the endpoint's breaker.
    pub fn release(&self, mut lease: Lease, outcome: &Result<ApiResponse, TransportError>) {
        lease.returned = true;
        if let Some(permit) = lease.permit.take() {
            match outcome {
                Ok(resp) if resp.status < 500 => permit.success(),
                Ok(_) => permit.failure(),
                Err(e) if e.counts_against_circuit() => permit.failure(),
                // the endpoint answered, so it is alive
                Err(TransportError::Remote { .. }) => permit.success(),
                Err(_) => drop(permit),
            }
        }
        let broken = matches!(outcome, Err(TransportError::ConnectionFailure { .. }))
            || !lease.session.is_healthy();
        self.return_session(lease.session_id, broken);
    }

    fn return_session(&self, id: u64, broken: bool) {
        let to_close = {
            let mut state = self.state.lock();
            let Some(idx) = state.sessions.iter().position(|s| s.id == id) else {
                return;
            };
            let (idle, is_broken) = {
                let s = &mut state.sessions[idx];
                s.in_flight = s.in_flight.saturating_sub(1);
                s.last_used_at = Instant::now();
                s.broken |= broken;
                (s.in_flight == 0, s.broken)
            };
            let over_keepalive = state.idle_count() > self.config.max_keepalive;
            if idle && (is_broken || state.closed || over_keepalive) {
                Some(state.sessions.swap_remove(idx).session)
            } else {
                None
            }
        };
        self.released.notify_waiters();
        if let Some(session) = to_close {
            self.close_detached(session);
        }
    }

    fn close_detached(&self, session: Arc<dyn Session>) {
        self.counters.sessions_closed.fetch_add(1, Ordering::Relaxed);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { session.close().await });
        }
    }

    /// Call `method` on `endpoint`, retrying transient failures.
    ///
    /// Retries stop when the policy is exhausted, when the error is not
    /// retryable, when the endpoint's circuit is open, or when the next
    /// backoff would overrun `deadline`.
    pub async fn invoke(
        self: &Arc<Self>,
        endpoint: &Endpoint,
        method: &str,
        payload: Value,
        deadline: Deadline,
    ) -> Result<ApiResponse, TransportError> {
        let request = ApiRequest {
            path: method.to_string(),
            payload,
        };
        let endpoint_label = endpoint.to_string();
        let mut retries = 0u32;

        loop {
            let started = Instant::now();
            let result = self.attempt(endpoint, &request, deadline).await;
            self.counters.calls.fetch_add(1, Ordering::Relaxed);
            let label = match &result {
                Ok(_) => "ok",
                Err(e) => e.label(),
            };
            metrics::record_outbound_call(&endpoint_label, label, started.elapsed());

            let err = match result {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            if err.is_call_failure() {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
            }

            if !err.is_retryable() || !self.retry.allows_retry(retries) {
                return Err(err);
            }
            if self.breakers.state(&endpoint_label) == CircuitState::Open {
                return Err(err);
            }
            let delay = self.retry.backoff(retries + 1);
            if !deadline.allows(delay) {
                return Err(err);
            }

            retries += 1;
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                endpoint = %endpoint_label,
                method,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying outbound call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        self: &Arc<Self>,
        endpoint: &Endpoint,
        request: &ApiRequest,
        deadline: Deadline,
    ) -> Result<ApiResponse, TransportError> {
        let timeout = || TransportError::Timeout {
            endpoint: endpoint.to_string(),
        };

        let lease = match deadline.run(self.acquire(endpoint)).await {
            Ok(lease) => lease?,
            Err(_) => return Err(timeout()),
        };
        let outcome = match deadline.run(lease.session().call(request)).await {
            Ok(Ok(resp)) if resp.status >= 400 => Err(TransportError::Remote {
                endpoint: endpoint.to_string(),
                status: resp.status,
                body: resp.body,
            }),
            Ok(result) => result,
            Err(_) => Err(timeout()),
        };
        self.release(lease, &outcome);
        outcome
    }

    /// Stop handing out sessions, wait up to `grace` for in-flight calls,
    /// then close everything. Returns how many sessions were still busy.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.state.lock().closed = true;
        self.released.notify_waiters();

        let give_up_at = Instant::now() + grace;
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let busy = self
                .state
                .lock()
                .sessions
                .iter()
                .filter(|s| s.in_flight > 0)
                .count();
            if busy == 0 {
                break;
            }
            if tokio::time::timeout_at(give_up_at, notified).await.is_err() {
                break;
            }
        }

        let (sessions, forced) = {
            let mut state = self.state.lock();
            let forced = state.sessions.iter().filter(|s| s.in_flight > 0).count();
            let sessions: Vec<_> = state.sessions.drain(..).map(|s| s.session).collect();
            (sessions, forced)
        };
        let closing = sessions.len();
        for session in sessions {
            session.close().await;
        }
        self.counters
            .sessions_closed
            .fetch_add(closing as u64, Ordering::Relaxed);

        if forced > 0 {
            tracing::warn!(forced, "Connection pool force-closed busy sessions");
        } else {
            tracing::info!(closed = closing, "Connection pool shut down");
        }
        forced
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let (sessions, idle_sessions, in_flight_calls, connecting) = {
            let state = self.state.lock();
            (
                state.sessions.len(),
                state.idle_count(),
                state.sessions.iter().map(|s| s.in_flight).sum(),
                state.connecting,
            )
        };
        metrics::set_pool_sessions(sessions, idle_sessions);

        let c = &self.counters;
        PoolSnapshot {
            sessions,
            idle_sessions,
            in_flight_calls,
            connecting,
            max_connections: self.config.max_connections,
            sessions_opened: c.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: c.sessions_closed.load(Ordering::Relaxed),
            calls: c.calls.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            circuit_rejections: c.circuit_rejections.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
            cached_hosts: self.dns.len(),
            circuits: self.breakers.snapshot(),
        }
    }
}

/// Reserved connection slot; released when dropped, including on cancellation.
struct ConnectSlot<'a> {
    pool: &'a ConnectionPool,
}

impl Drop for ConnectSlot<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.pool.state.lock();
            state.connecting = state.connecting.saturating_sub(1);
        }
        self.pool.released.notify_waiters();
    }
}

/// A session checked out of the pool for one call.
pub struct Lease {
    pool: Arc<ConnectionPool>,
    endpoint: Endpoint,
    session_id: u64,
    session: Arc<dyn Session>,
    permit: Option<CallPermit>,
    returned: bool,
}

impl Lease {
    fn new(
        pool: Arc<ConnectionPool>,
        endpoint: Endpoint,
        session_id: u64,
        session: Arc<dyn Session>,
        permit: CallPermit,
    ) -> Self {
        Self {
            pool,
            endpoint,
            session_id,
            session,
            permit: Some(permit),
            returned: false,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.permit.as_ref().is_some_and(|p| p.is_trial())
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.returned {
            self.pool.return_session(self.session_id, false);
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("endpoint", &self.endpoint)
            .field("session_id", &self.session_id)
            .field("trial", &self.is_trial())
            .finish()
    }
}

//! The dispatcher façade.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::pipeline::Pipeline;
use crate::config::{PriorityConfig, RuntimeConfig, WorkerConfig};
use crate::event::Event;
use crate::middleware::analytics::{Analytics, AnalyticsSnapshot};
use crate::middleware::{self, Middleware};
use crate::resilience::circuit_breaker::CircuitSnapshot;
use crate::resilience::retries::RetryPolicy;
use crate::routing::Router;
use crate::storage::KeyValueStore;
use crate::transport::{ApiClient, ConnectionPool, PoolSnapshot};
use crate::worker::{
    DeadLetterStore, ShutdownReport, SubmitError, WorkItem, WorkQueue, WorkerPool,
    WorkerStatsSnapshot,
};

/// Receipt for an admitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub work_item_id: Uuid,
    pub priority: u8,
}

/// Point-in-time view of the whole runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub accepting: bool,
    pub workers: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    /// Queued retries still waiting out their backoff.
    pub delayed_retries: usize,
    pub in_flight: u64,
    pub counters: WorkerStatsSnapshot,
    pub dead_letters: usize,
    pub circuits: Vec<CircuitSnapshot>,
    pub connections: Option<PoolSnapshot>,
    /// Present when the analytics stage is installed.
    pub analytics: Option<AnalyticsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub resubmitted: usize,
    /// Entries put back because they could not be admitted.
    pub restored: usize,
}

pub struct Dispatcher {
    router: Arc<Router>,
    pipeline: Arc<Pipeline>,
    workers: WorkerPool,
    priorities: PriorityConfig,
    connections: Option<Arc<ConnectionPool>>,
    analytics: Option<Arc<Analytics>>,
}

impl Dispatcher {
    pub fn builder(router: Router) -> DispatcherBuilder {
        DispatcherBuilder::new(router)
    }

    /// Launch `worker_count` workers.
    pub fn start(&self, worker_count: usize) {
        if worker_count == 0 {
            tracing::warn!("Dispatcher started with zero workers; items will only queue");
        }
        self.workers.start(worker_count, self.pipeline.clone());
    }

    /// Admit an event at the priority its kind maps to.
    pub async fn submit(&self, event: Event) -> Result<Accepted, SubmitError> {
        let priority = self.priority_for(&event);
        self.submit_with_priority(event, priority).await
    }

    /// Admit an event with an explicit priority override.
    pub async fn submit_with_priority(
        &self,
        event: Event,
        priority: u8,
    ) -> Result<Accepted, SubmitError> {
        let item = WorkItem::new(Arc::new(event), priority);
        let accepted = Accepted {
            work_item_id: item.id,
            priority,
        };
        let sequence_id = item.event.sequence_id;
        match self.workers.submit(item).await {
            Ok(()) => {
                tracing::trace!(
                    work_item_id = %accepted.work_item_id,
                    sequence_id,
                    priority,
                    "Event accepted"
                );
                Ok(accepted)
            }
            Err(e) => {
                tracing::warn!(sequence_id, error = %e, "Event refused");
                Err(e)
            }
        }
    }

    /// Priority tier for `event`; command messages get the command tier.
    pub fn priority_for(&self, event: &Event) -> u8 {
        let is_command = self.router.parse_command(event).is_some();
        self.priorities.tier(event.update_kind(), is_command)
    }

    /// Stop accepting events and shut the workers down.
    pub async fn stop(&self, drain: bool) -> ShutdownReport {
        tracing::info!(drain, queued = self.workers.queue().depth(), "Stopping dispatcher");
        self.workers.stop(drain).await
    }

    /// Resubmit every dead letter with a fresh retry count.
    pub async fn replay_dead_letters(&self) -> ReplayReport {
        let store = self.workers.dead_letters();
        let mut report = ReplayReport::default();
        for entry in store.take_all() {
            match self
                .submit_with_priority(entry.event.clone(), entry.priority)
                .await
            {
                Ok(_) => report.resubmitted += 1,
                Err(_) => {
                    store.restore(entry);
                    report.restored += 1;
                }
            }
        }
        tracing::info!(
            resubmitted = report.resubmitted,
            restored = report.restored,
            "Dead letters replayed"
        );
        report
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        let queue = self.workers.queue();
        let counters = self.workers.stats();
        let connections = self.connections.as_ref().map(|pool| pool.snapshot());
        RuntimeSnapshot {
            accepting: !queue.is_closed(),
            workers: self.workers.worker_count(),
            queue_depth: queue.depth(),
            queue_capacity: queue.capacity(),
            delayed_retries: queue.delayed(),
            in_flight: counters.in_flight,
            counters,
            dead_letters: self.workers.dead_letters().len(),
            circuits: connections
                .as_ref()
                .map(|c| c.circuits.clone())
                .unwrap_or_default(),
            connections,
            analytics: self.analytics.as_ref().map(|a| a.snapshot()),
        }
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterStore> {
        self.workers.dead_letters()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn middleware_names(&self) -> Vec<String> {
        self.pipeline.middleware_names()
    }

    pub fn analytics(&self) -> Option<&Arc<Analytics>> {
        self.analytics.as_ref()
    }
}

pub struct DispatcherBuilder {
    router: Router,
    middleware: Vec<Arc<dyn Middleware>>,
    api: Option<Arc<ApiClient>>,
    connections: Option<Arc<ConnectionPool>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    workers: WorkerConfig,
    priorities: PriorityConfig,
    dead_letters: Option<Arc<DeadLetterStore>>,
    analytics: Option<Arc<Analytics>>,
}

impl DispatcherBuilder {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            middleware: Vec::new(),
            api: None,
            connections: None,
            storage: None,
            workers: WorkerConfig::default(),
            priorities: PriorityConfig::default(),
            dead_letters: None,
            analytics: None,
        }
    }

    /// Worker and priority settings plus the built-in middleware the
    /// config enables, placed before any middleware added so far.
    /// Analytics, when enabled, is the innermost built-in stage.
    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        self.workers = config.workers.clone();
        self.priorities = config.priorities.clone();
        let mut chain = middleware::from_config(config);
        if config.analytics.enabled && self.analytics.is_none() {
            let analytics = Arc::new(Analytics::from_config(&config.analytics));
            chain.push(analytics.clone());
            self.analytics = Some(analytics);
        }
        chain.append(&mut self.middleware);
        self.middleware = chain;
        self
    }

    pub fn workers(mut self, workers: WorkerConfig) -> Self {
        self.workers = workers;
        self
    }

    pub fn priorities(mut self, priorities: PriorityConfig) -> Self {
        self.priorities = priorities;
        self
    }

    /// Append a stage; stages run in the order they are added.
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append a shared analytics stage and report it in snapshots.
    pub fn analytics(mut self, analytics: Arc<Analytics>) -> Self {
        self.middleware.push(analytics.clone());
        self.analytics = Some(analytics);
        self
    }

    /// Handlers reach the messaging API through `api`; its pool is
    /// reported in snapshots.
    pub fn api(mut self, api: Arc<ApiClient>) -> Self {
        self.connections = Some(api.pool().clone());
        self.api = Some(api);
        self
    }

    /// Report a pool in snapshots without exposing an API client.
    pub fn connection_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.connections = Some(pool);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn dead_letters(mut self, store: Arc<DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    pub fn build(self) -> Dispatcher {
        let router = Arc::new(self.router);
        let pipeline = Arc::new(Pipeline::new(
            router.clone(),
            self.middleware,
            self.api,
            self.storage,
        ));
        let workers = WorkerPool::new(
            Arc::new(WorkQueue::from_config(&self.workers)),
            self.dead_letters
                .unwrap_or_else(|| Arc::new(DeadLetterStore::in_memory())),
            RetryPolicy::for_workers(&self.workers),
            self.workers.shutdown_timeout(),
        );
        let (commands, filters) = router.route_counts();
        tracing::info!(
            commands,
            filters,
            queue_capacity = self.workers.queue_capacity,
            backpressure = ?self.workers.backpressure,
            "Dispatcher built"
        );
        Dispatcher {
            router,
            pipeline,
            workers,
            priorities: self.priorities,
            connections: self.connections,
            analytics: self.analytics,
        }
    }
}

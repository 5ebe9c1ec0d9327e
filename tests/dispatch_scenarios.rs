//! End-to-end dispatch scenarios: routing precedence, priority, backpressure,
//! retries, dead letters, middleware and shutdown.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dispatch_runtime::config::{
    BackpressureMode, CircuitBreakerConfig, RetryConfig, RuntimeConfig, WorkerConfig,
};
use dispatch_runtime::handler::{handler_fn, Context, Flow, HandlerError};
use dispatch_runtime::middleware::AccessControl;
use dispatch_runtime::routing::{filters, Filter, Router};
use dispatch_runtime::storage::MemoryStore;
use dispatch_runtime::worker::{FailureReason, SubmitError};
use dispatch_runtime::Dispatcher;

mod common;

fn workers(capacity: usize, mode: BackpressureMode) -> WorkerConfig {
    WorkerConfig {
        count: 4,
        queue_capacity: capacity,
        backpressure: mode,
        submit_timeout_ms: 5_000,
        max_retries: 3,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        shutdown_timeout_secs: 5,
    }
}

#[tokio::test]
async fn command_route_wins_over_generic_text_filter() {
    let log = common::log();
    let mut router = Router::default();
    router
        .command("start", common::recording(&log, "H1", Flow::Handled))
        .unwrap();
    router
        .on(filters::text(), common::recording(&log, "H2", Flow::Handled))
        .unwrap();

    let dispatcher = Dispatcher::builder(router).build();
    dispatcher.start(2);
    dispatcher
        .submit(common::text_event(1, 10, "/start"))
        .await
        .unwrap();
    let report = dispatcher.stop(true).await;

    assert!(report.drained);
    assert_eq!(*log.lock(), vec!["H1"]);
    assert_eq!(dispatcher.snapshot().counters.handled, 1);
}

#[tokio::test]
async fn plain_text_falls_through_to_the_filter_route() {
    let log = common::log();
    let mut router = Router::default();
    router
        .command("start", common::recording(&log, "H1", Flow::Handled))
        .unwrap();
    router
        .on(filters::text(), common::recording(&log, "H2", Flow::Handled))
        .unwrap();

    let dispatcher = Dispatcher::builder(router).build();
    dispatcher.start(1);
    dispatcher
        .submit(common::text_event(1, 10, "hello"))
        .await
        .unwrap();
    dispatcher
        .submit(common::callback_event(2, 10, "vote:1"))
        .await
        .unwrap();
    dispatcher.stop(true).await;

    assert_eq!(*log.lock(), vec!["H2"]);
    let counters = dispatcher.snapshot().counters;
    assert_eq!(counters.handled, 1);
    assert_eq!(counters.unmatched, 1);
}

#[tokio::test]
async fn high_priority_event_overtakes_a_hundred_queued_low_priority_ones() {
    let log = common::log();
    let mut router = Router::default();
    router
        .on(Filter::always(), common::sequence_recorder(&log))
        .unwrap();

    let dispatcher = Dispatcher::builder(router)
        .workers(workers(200, BackpressureMode::Reject))
        .build();

    for seq in 0..100 {
        dispatcher
            .submit_with_priority(common::text_event(seq, 1, "bulk"), 0)
            .await
            .unwrap();
    }
    dispatcher
        .submit_with_priority(common::text_event(500, 1, "urgent"), 3)
        .await
        .unwrap();

    // One worker, started only after everything is queued.
    dispatcher.start(1);
    dispatcher.stop(true).await;

    let order = log.lock().clone();
    assert_eq!(order.len(), 101);
    assert_eq!(order[0], "500");
    assert_eq!(order[1], "0");
    assert_eq!(order[100], "99");
}

#[tokio::test]
async fn callback_queries_get_a_higher_default_tier_than_text() {
    let log = common::log();
    let mut router = Router::default();
    router
        .on(Filter::always(), common::sequence_recorder(&log))
        .unwrap();
    let dispatcher = Dispatcher::builder(router).build();

    let text = dispatcher
        .submit(common::text_event(1, 1, "hi"))
        .await
        .unwrap();
    let callback = dispatcher
        .submit(common::callback_event(2, 1, "ok"))
        .await
        .unwrap();
    assert!(callback.priority > text.priority);

    dispatcher.start(1);
    dispatcher.stop(true).await;
    assert_eq!(*log.lock(), vec!["2", "1"]);
}

#[tokio::test]
async fn reject_mode_refuses_the_submission_past_capacity() {
    let dispatcher = Dispatcher::builder(Router::default())
        .workers(workers(3, BackpressureMode::Reject))
        .build();

    for seq in 0..3 {
        dispatcher
            .submit(common::text_event(seq, 1, "x"))
            .await
            .unwrap();
    }
    let refused = dispatcher.submit(common::text_event(3, 1, "x")).await;
    assert_eq!(refused, Err(SubmitError::QueueFull { capacity: 3 }));

    let snapshot = dispatcher.snapshot();
    assert_eq!(snapshot.queue_depth, 3);
    assert_eq!(snapshot.counters.rejected, 1);
}

#[tokio::test]
async fn block_mode_holds_the_extra_submission_until_a_slot_frees() {
    let dispatcher = Arc::new(
        Dispatcher::builder(Router::default())
            .workers(workers(2, BackpressureMode::Block))
            .build(),
    );
    dispatcher
        .submit(common::text_event(1, 1, "a"))
        .await
        .unwrap();
    dispatcher
        .submit(common::text_event(2, 1, "b"))
        .await
        .unwrap();

    let blocked = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.submit(common::text_event(3, 1, "c")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    dispatcher.start(1);
    let accepted = tokio::time::timeout(Duration::from_secs(2), blocked)
        .await
        .expect("submit should unblock once a worker dequeues")
        .unwrap();
    assert!(accepted.is_ok());

    dispatcher.stop(true).await;
    assert_eq!(dispatcher.snapshot().counters.unmatched, 3);
}

#[tokio::test]
async fn always_transient_handler_is_retried_max_retries_times_then_dead_lettered() {
    let attempts = Arc::new(AtomicU32::new(0));
    let mut router = Router::default();
    {
        let attempts = attempts.clone();
        router
            .command(
                "flaky",
                handler_fn(move |_ctx: Context| {
                    let attempts = attempts.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err(HandlerError::transient("upstream timed out"))
                    }
                }),
            )
            .unwrap();
    }

    let dispatcher = Dispatcher::builder(router)
        .workers(workers(10, BackpressureMode::Reject))
        .build();
    dispatcher.start(2);
    dispatcher
        .submit(common::text_event(7, 1, "/flaky"))
        .await
        .unwrap();
    dispatcher.stop(true).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    let entries = dispatcher.dead_letters().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].retry_count_at_failure, 3);
    assert_eq!(entries[0].event.sequence_id, 7);
    assert!(matches!(
        entries[0].failure_reason,
        FailureReason::RetriesExhausted { .. }
    ));

    let counters = dispatcher.snapshot().counters;
    assert_eq!(counters.retried, 3);
    assert_eq!(counters.dead_lettered, 1);
}

#[tokio::test]
async fn permanent_failure_is_dead_lettered_without_retry() {
    let attempts = Arc::new(AtomicU32::new(0));
    let mut router = Router::default();
    {
        let attempts = attempts.clone();
        router
            .on(
                filters::text(),
                handler_fn(move |_ctx: Context| {
                    let attempts = attempts.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err(HandlerError::permanent("cannot parse amount"))
                    }
                }),
            )
            .unwrap();
    }

    let dispatcher = Dispatcher::builder(router).build();
    dispatcher.start(1);
    dispatcher
        .submit(common::text_event(1, 1, "pay lots"))
        .await
        .unwrap();
    dispatcher.stop(true).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    let entries = dispatcher.dead_letters().entries();
    assert_eq!(entries[0].retry_count_at_failure, 0);
    assert_eq!(entries[0].failure_reason.label(), "permanent");
}

#[tokio::test]
async fn a_panicking_handler_leaves_the_worker_serving() {
    let log = common::log();
    let mut router = Router::default();
    router
        .command(
            "boom",
            handler_fn(|ctx: Context| async move {
                if ctx.args().is_empty() {
                    panic!("index out of bounds");
                }
                Ok(Flow::Handled)
            }),
        )
        .unwrap();
    router
        .command("ok", common::recording(&log, "ok", Flow::Handled))
        .unwrap();

    let dispatcher = Dispatcher::builder(router).build();
    dispatcher.start(1);
    dispatcher
        .submit(common::text_event(1, 1, "/boom"))
        .await
        .unwrap();
    dispatcher
        .submit(common::text_event(2, 1, "/ok"))
        .await
        .unwrap();
    dispatcher.stop(true).await;

    assert_eq!(*log.lock(), vec!["ok"]);
    let entries = dispatcher.dead_letters().entries();
    assert_eq!(entries.len(), 1);
    assert!(matches!(
        &entries[0].failure_reason,
        FailureReason::Panicked { message } if message == "index out of bounds"
    ));
}

#[tokio::test]
async fn submitting_one_event_twice_yields_two_independent_items() {
    let log = common::log();
    let mut router = Router::default();
    {
        let log = log.clone();
        router
            .on(
                filters::text(),
                handler_fn(move |ctx: Context| {
                    let log = log.clone();
                    async move {
                        log.lock()
                            .push(ctx.event().text().unwrap_or_default().to_string());
                        Ok(Flow::Handled)
                    }
                }),
            )
            .unwrap();
    }

    let dispatcher = Dispatcher::builder(router).build();
    let event = common::text_event(1, 1, "same payload");
    let first = dispatcher.submit(event.clone()).await.unwrap();
    let second = dispatcher.submit(event.clone()).await.unwrap();
    assert_ne!(first.work_item_id, second.work_item_id);

    dispatcher.start(2);
    dispatcher.stop(true).await;

    assert_eq!(*log.lock(), vec!["same payload", "same payload"]);
    assert_eq!(dispatcher.snapshot().counters.handled, 2);
}

#[tokio::test]
async fn stop_without_drain_surfaces_queued_events_as_dead_letters() {
    let dispatcher = Dispatcher::builder(Router::default()).build();
    for seq in 0..3 {
        dispatcher
            .submit(common::text_event(seq, 1, "queued"))
            .await
            .unwrap();
    }

    let report = dispatcher.stop(false).await;
    assert_eq!(report.abandoned, 3);
    assert!(!report.drained);

    let entries = dispatcher.dead_letters().entries();
    assert_eq!(entries.len(), 3);
    assert!(entries
        .iter()
        .all(|e| e.failure_reason == FailureReason::Abandoned));

    assert_eq!(
        dispatcher.submit(common::text_event(9, 1, "late")).await,
        Err(SubmitError::ShuttingDown)
    );

    // Nothing can be resubmitted after shutdown; entries stay put.
    let replay = dispatcher.replay_dead_letters().await;
    assert_eq!(replay.resubmitted, 0);
    assert_eq!(replay.restored, 3);
    assert_eq!(dispatcher.dead_letters().len(), 3);
}

#[tokio::test]
async fn replayed_dead_letters_run_again_with_a_fresh_retry_count() {
    let healthy = Arc::new(AtomicBool::new(false));
    let log = common::log();
    let mut router = Router::default();
    {
        let healthy = healthy.clone();
        let log = log.clone();
        router
            .on(
                filters::text(),
                handler_fn(move |ctx: Context| {
                    let healthy = healthy.clone();
                    let log = log.clone();
                    async move {
                        if !healthy.load(Ordering::SeqCst) {
                            return Err(HandlerError::permanent("dependency missing"));
                        }
                        log.lock().push(format!("attempt {}", ctx.attempt()));
                        Ok(Flow::Handled)
                    }
                }),
            )
            .unwrap();
    }

    let dispatcher = Dispatcher::builder(router).build();
    dispatcher.start(1);
    dispatcher
        .submit(common::text_event(1, 1, "order"))
        .await
        .unwrap();
    assert!(
        common::eventually(Duration::from_secs(2), || dispatcher.dead_letters().len() == 1).await
    );

    healthy.store(true, Ordering::SeqCst);
    let replay = dispatcher.replay_dead_letters().await;
    assert_eq!(replay.resubmitted, 1);
    dispatcher.stop(true).await;

    assert_eq!(*log.lock(), vec!["attempt 0"]);
    assert!(dispatcher.dead_letters().is_empty());
    assert_eq!(dispatcher.dead_letters().total(), 1);
}

#[tokio::test]
async fn middleware_veto_skips_every_handler() {
    let log = common::log();
    let mut router = Router::default();
    router
        .on(Filter::always(), common::recording(&log, "handler", Flow::Handled))
        .unwrap();

    let dispatcher = Dispatcher::builder(router)
        .middleware(AccessControl::new([], [66]))
        .build();
    dispatcher.start(1);
    dispatcher
        .submit(common::text_event(1, 66, "let me in"))
        .await
        .unwrap();
    dispatcher
        .submit(common::text_event(2, 1, "hello"))
        .await
        .unwrap();
    dispatcher.stop(true).await;

    assert_eq!(*log.lock(), vec!["handler"]);
    let counters = dispatcher.snapshot().counters;
    assert_eq!(counters.vetoed, 1);
    assert_eq!(counters.handled, 1);
}

#[tokio::test]
async fn configured_rate_limit_vetoes_a_burst_from_one_user() {
    let log = common::log();
    let mut router = Router::default();
    router
        .on(Filter::always(), common::recording(&log, "handled", Flow::Handled))
        .unwrap();

    let mut config = RuntimeConfig::default();
    config.workers = workers(10, BackpressureMode::Reject);
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_minute = 1;
    config.rate_limit.burst_size = 2;

    let dispatcher = Dispatcher::builder(router).config(&config).build();
    for seq in 0..4 {
        dispatcher
            .submit(common::text_event(seq, 5, "spam"))
            .await
            .unwrap();
    }
    dispatcher
        .submit(common::text_event(10, 6, "someone else"))
        .await
        .unwrap();
    dispatcher.start(1);
    dispatcher.stop(true).await;

    let snapshot = dispatcher.snapshot();
    assert_eq!(snapshot.counters.handled, 3);
    assert_eq!(snapshot.counters.vetoed, 2);

    // Analytics sits inside the rate limit and only sees admitted events.
    let analytics = snapshot.analytics.unwrap();
    assert_eq!(analytics.events, 3);
    assert_eq!(analytics.usage[0].key, "message");
    assert_eq!(analytics.usage[0].unique_users, 2);
}

#[tokio::test]
async fn handlers_reply_through_the_pool_and_keep_fsm_state() {
    let connector = common::ScriptedConnector::new(|_| 200);
    let api = common::scripted_client(
        connector.clone(),
        CircuitBreakerConfig::default(),
        RetryConfig::default(),
    );

    let mut router = Router::default();
    router
        .command(
            "signup",
            handler_fn(|ctx: Context| async move {
                ctx.set_state("awaiting_email").await?;
                ctx.reply("What is your email?").await?;
                Ok(Flow::Handled)
            }),
        )
        .unwrap();
    router
        .on(
            filters::text(),
            handler_fn(|ctx: Context| async move {
                if ctx.state().await?.as_deref() == Some("awaiting_email") {
                    ctx.clear_state().await?;
                    ctx.reply("Thanks!").await?;
                }
                Ok(Flow::Handled)
            }),
        )
        .unwrap();

    let dispatcher = Dispatcher::builder(router)
        .api(api)
        .storage(Arc::new(MemoryStore::new()))
        .build();

    // One worker keeps the two events of this conversation in order.
    dispatcher.start(1);
    dispatcher
        .submit(common::text_event(1, 42, "/signup"))
        .await
        .unwrap();
    dispatcher
        .submit(common::text_event(2, 42, "me@example.com"))
        .await
        .unwrap();
    dispatcher.stop(true).await;

    assert_eq!(connector.calls(), 2);
    assert_eq!(
        *connector.paths.lock(),
        vec!["/botTEST/sendMessage", "/botTEST/sendMessage"]
    );

    let snapshot = dispatcher.snapshot();
    assert_eq!(snapshot.counters.handled, 2);
    let connections = snapshot.connections.expect("pool is reported");
    assert_eq!(connections.calls, 2);
    assert_eq!(snapshot.circuits.len(), 1);
}

#[tokio::test]
async fn run_all_propagation_invokes_every_match_until_one_stops() {
    let log = common::log();
    let mut config = RuntimeConfig::default();
    config.router.propagation = dispatch_runtime::config::Propagation::RunAll;
    let mut router = Router::new(&config.router);
    router
        .register(
            dispatch_runtime::routing::Pattern::Filter,
            filters::text(),
            common::recording(&log, "audit", Flow::Handled),
            10,
        )
        .unwrap();
    router
        .on(filters::text(), common::recording(&log, "reply", Flow::Stop))
        .unwrap();
    router
        .on(Filter::always(), common::recording(&log, "never", Flow::Handled))
        .unwrap();

    let dispatcher = Dispatcher::builder(router).build();
    dispatcher.start(1);
    let accepted = dispatcher
        .submit(common::text_event(1, 1, "hi"))
        .await
        .unwrap();
    dispatcher.stop(true).await;

    assert_eq!(accepted.priority, 1);
    assert_eq!(*log.lock(), vec!["audit", "reply"]);
    // One item, two handlers.
    assert_eq!(dispatcher.snapshot().counters.handled, 1);
}

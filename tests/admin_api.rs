//! Admin API over a real listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;

use dispatch_runtime::admin::{setup_admin_router, AdminState};
use dispatch_runtime::config::{RouterConfig, WorkerConfig};
use dispatch_runtime::middleware::Analytics;
use dispatch_runtime::{handler_fn, Dispatcher, Flow, HandlerError, Router};

mod common;

const KEY: &str = "test-admin-key";

async fn serve(dispatcher: Arc<Dispatcher>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = setup_admin_router(AdminState::new(dispatcher, KEY));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Dispatcher with a queue but no workers, so submitted events stay queued.
fn idle_dispatcher() -> Arc<Dispatcher> {
    let workers = WorkerConfig {
        queue_capacity: 16,
        ..WorkerConfig::default()
    };
    Arc::new(
        Dispatcher::builder(Router::new(&RouterConfig::default()))
            .workers(workers)
            .build(),
    )
}

async fn get(addr: SocketAddr, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("http://{addr}{path}"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn requests_without_the_key_are_rejected() {
    let addr = serve(idle_dispatcher()).await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("http://{addr}/admin/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = client
        .get(format!("http://{addr}/admin/status"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let replay = client
        .post(format!("http://{addr}/admin/dead-letters/replay"))
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 401);
}

#[tokio::test]
async fn status_and_snapshot_report_the_queue() {
    let dispatcher = idle_dispatcher();
    dispatcher
        .submit(common::text_event(1, 7, "hello"))
        .await
        .unwrap();
    let addr = serve(dispatcher.clone()).await;

    let status: Value = get(addr, "/admin/status").await.json().await.unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["queue_depth"], 1);
    assert_eq!(status["dead_letters"], 0);

    let snapshot: Value = get(addr, "/admin/snapshot").await.json().await.unwrap();
    assert_eq!(snapshot["queue_capacity"], 16);
    assert_eq!(snapshot["counters"]["submitted"], 1);
    assert_eq!(snapshot["accepting"], true);
}

#[tokio::test]
async fn dead_letters_are_listed_and_replay_restores_when_closed() {
    let dispatcher = idle_dispatcher();
    for seq in 1..=2 {
        dispatcher
            .submit(common::text_event(seq, 7, "queued"))
            .await
            .unwrap();
    }
    let report = dispatcher.stop(false).await;
    assert_eq!(report.abandoned, 2);
    let addr = serve(dispatcher.clone()).await;

    let status: Value = get(addr, "/admin/status").await.json().await.unwrap();
    assert_eq!(status["status"], "shutting_down");

    let entries: Value = get(addr, "/admin/dead-letters").await.json().await.unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["failure_reason"]["reason"], "abandoned");
    assert_eq!(entries[0]["retry_count_at_failure"], 0);

    // Nothing can be admitted after stop, so every entry is kept.
    let replay: Value = reqwest::Client::new()
        .post(format!("http://{addr}/admin/dead-letters/replay"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(replay["resubmitted"], 0);
    assert_eq!(replay["restored"], 2);
    assert_eq!(dispatcher.dead_letters().len(), 2);
}

#[tokio::test]
async fn snapshot_reports_command_analytics() {
    let mut router = Router::new(&RouterConfig::default());
    router
        .command("start", handler_fn(|_ctx| async { Ok(Flow::Handled) }))
        .unwrap();
    router
        .command(
            "broken",
            handler_fn(|_ctx| async { Err(HandlerError::permanent("bad input")) }),
        )
        .unwrap();
    let dispatcher = Arc::new(
        Dispatcher::builder(router)
            .analytics(Arc::new(Analytics::new(100, Duration::from_secs(60))))
            .build(),
    );
    dispatcher.start(1);
    for (seq, user, text) in [(1, 7, "/start"), (2, 8, "/start"), (3, 7, "/broken")] {
        dispatcher
            .submit(common::text_event(seq, user, text))
            .await
            .unwrap();
    }
    dispatcher.stop(true).await;
    let addr = serve(dispatcher).await;

    let snapshot: Value = get(addr, "/admin/snapshot").await.json().await.unwrap();
    let analytics = &snapshot["analytics"];
    assert_eq!(analytics["events"], 3);
    assert_eq!(analytics["tracked_users"], 2);
    assert_eq!(analytics["usage"][0]["key"], "/start");
    assert_eq!(analytics["usage"][0]["uses"], 2);
    assert_eq!(analytics["usage"][0]["unique_users"], 2);
    assert_eq!(analytics["usage"][1]["key"], "/broken");
    assert_eq!(analytics["usage"][1]["failures"], 1);
}

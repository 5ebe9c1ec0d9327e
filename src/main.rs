//! Update dispatch runtime.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────────┐
//!                       │                    DISPATCH RUNTIME                       │
//!                       │                                                           │
//!   Inbound events      │  ┌──────────┐    ┌──────────┐    ┌──────────────────┐    │
//!   ────────────────────┼─▶│dispatcher│───▶│  work    │───▶│   worker pool    │    │
//!   (NDJSON on stdin)   │  │ submit   │    │  queue   │    │ (N tokio tasks)  │    │
//!                       │  └──────────┘    └──────────┘    └────────┬─────────┘    │
//!                       │                                           │              │
//!                       │                                           ▼              │
//!                       │                  ┌──────────┐    ┌──────────────────┐    │
//!                       │                  │ handlers │◀───│ middleware chain │    │
//!                       │                  │          │    │   → router       │    │
//!                       │                  └────┬─────┘    └──────────────────┘    │
//!                       │                       │                                  │
//!                       │                       ▼                                  │
//!   Messaging API       │  ┌──────────┐    ┌──────────────────┐                    │
//!   ◀───────────────────┼──│ session  │◀───│ connection pool  │                    │
//!                       │  │ (reqwest)│    │ + circuit breaker│                    │
//!                       │  └──────────┘    └──────────────────┘                    │
//!                       │                                                           │
//!                       │  ┌────────────────────────────────────────────────────┐  │
//!                       │  │ config │ observability │ lifecycle │ admin (axum)  │  │
//!                       │  └────────────────────────────────────────────────────┘  │
//!                       └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use dispatch_runtime::admin::{setup_admin_router, AdminState};
use dispatch_runtime::config::{load_config, RouterConfig, RuntimeConfig};
use dispatch_runtime::handler::{handler_fn, Context, Flow};
use dispatch_runtime::lifecycle::{wait_for_signal, Shutdown};
use dispatch_runtime::observability::{logging, metrics};
use dispatch_runtime::resilience::RetryPolicy;
use dispatch_runtime::routing::{filters, Pattern, Router, RouterError};
use dispatch_runtime::storage::{memory::MemoryStore, KeyValueStore};
use dispatch_runtime::transport::{ApiClient, ConnectionPool, DnsCache, HttpConnector};
use dispatch_runtime::worker::DeadLetterStore;
use dispatch_runtime::{Dispatcher, Event};

#[derive(Parser)]
#[command(name = "dispatch-runtime")]
#[command(about = "Update dispatch runtime for messaging bots", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dead-letter queued events on shutdown instead of draining them.
    #[arg(long)]
    no_drain: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.workers.count,
        queue_capacity = config.workers.queue_capacity,
        api = %config.api.base_url,
        "dispatch-runtime starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let pool = ConnectionPool::new(
        config.connection_pool.clone(),
        config.circuit_breaker.clone(),
        RetryPolicy::for_calls(&config.retries),
        Arc::new(HttpConnector::from_config(&config.connection_pool)),
        DnsCache::system(config.connection_pool.dns_ttl()),
    );
    let api = Arc::new(ApiClient::new(pool.clone(), &config.api, &config.retries)?);
    let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let dead_letters = Arc::new(DeadLetterStore::from_config(&config.dead_letter)?);

    let dispatcher = Arc::new(
        Dispatcher::builder(build_router(&config.router)?)
            .config(&config)
            .api(api)
            .storage(storage)
            .dead_letters(dead_letters)
            .build(),
    );
    dispatcher.start(config.workers.count);

    let shutdown = Shutdown::new();

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let app = setup_admin_router(AdminState::new(dispatcher.clone(), &config.admin.api_key));
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin server failed");
            }
        });
    }

    let mut ingestion = tokio::spawn(ingest_stdin(dispatcher.clone(), shutdown.subscribe()));

    let reason = tokio::select! {
        signal = wait_for_signal() => signal,
        _ = &mut ingestion => "input closed",
    };
    tracing::info!(reason, "Shutting down");

    shutdown.trigger();
    let report = dispatcher.stop(!cli.no_drain).await;
    let forced = pool.shutdown(config.connection_pool.shutdown_grace()).await;

    tracing::info!(
        drained = report.drained,
        abandoned = report.abandoned,
        dead_letters = dispatcher.dead_letters().len(),
        forced_sessions = forced,
        "Shutdown complete"
    );
    Ok(())
}

/// Read newline-delimited JSON events from stdin until EOF or shutdown.
async fn ingest_stdin(dispatcher: Arc<Dispatcher>, mut shutdown: broadcast::Receiver<()>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0u64;
    loop {
        let line = tokio::select! {
            _ = shutdown.recv() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read input");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed event");
                continue;
            }
        };
        match dispatcher.submit(event).await {
            Ok(_) => accepted += 1,
            Err(e) => tracing::warn!(error = %e, "Event not accepted"),
        }
    }
    tracing::info!(accepted, "Ingestion stopped");
}

fn build_router(config: &RouterConfig) -> Result<Router, RouterError> {
    let mut router = Router::new(config);

    router.command(
        "start",
        handler_fn(|ctx: Context| async move {
            let name = ctx
                .event()
                .user()
                .map(|u| u.first_name.clone())
                .unwrap_or_else(|| "there".to_string());
            ctx.reply(&format!("Hello, {name}!")).await?;
            Ok(Flow::Handled)
        }),
    )?;

    router.command(
        "echo",
        handler_fn(|ctx: Context| async move {
            let text = ctx
                .command()
                .map(|c| c.raw_args.clone())
                .filter(|args| !args.is_empty())
                .unwrap_or_else(|| "Usage: /echo <text>".to_string());
            ctx.reply(&text).await?;
            Ok(Flow::Handled)
        }),
    )?;

    router.command(
        "cancel",
        handler_fn(|ctx: Context| async move {
            ctx.clear_state().await?;
            ctx.reply("Cancelled.").await?;
            Ok(Flow::Handled)
        }),
    )?;

    router.register(
        Pattern::Filter,
        filters::callback_data("ack:"),
        handler_fn(|ctx: Context| async move {
            ctx.answer_callback(Some("Got it")).await?;
            Ok(Flow::Handled)
        }),
        10,
    )?;

    router.on(
        filters::text() & filters::private() & !filters::forwarded(),
        handler_fn(|ctx: Context| async move {
            tracing::debug!(sequence_id = ctx.event().sequence_id, "Unhandled private text");
            Ok(Flow::Handled)
        }),
    )?;

    Ok(router)
}

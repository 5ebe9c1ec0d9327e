//! Shared utilities for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use dispatch_runtime::config::{
    ApiConfig, CircuitBreakerConfig, ConnectionPoolConfig, RetryConfig,
};
use dispatch_runtime::event::{CallbackQuery, Chat, Event, EventKind, Message, User};
use dispatch_runtime::handler::{handler_fn, Context, Flow, Handler};
use dispatch_runtime::resilience::RetryPolicy;
use dispatch_runtime::transport::{
    ApiClient, ApiRequest, ApiResponse, ConnectionPool, Connector, DnsCache, Endpoint, Resolver,
    Session, TransportError,
};

/// A complete `Connection: close` JSON response.
fn http_response(status_line: &str, body: &str) -> String {
    format!(
        concat!(
            "HTTP/1.1 {}\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: {}\r\n",
            "Connection: close\r\n\r\n{}",
        ),
        status_line,
        body.len(),
        body
    )
}

pub fn text_event(seq: u64, user_id: i64, text: &str) -> Event {
    Event::new(
        seq,
        EventKind::Message(Message::text(
            seq as i64,
            Chat::private(user_id),
            User::new(user_id, "tester"),
            text,
        )),
    )
}

pub fn callback_event(seq: u64, user_id: i64, data: &str) -> Event {
    Event::new(
        seq,
        EventKind::CallbackQuery(CallbackQuery {
            id: format!("cb-{seq}"),
            from: User::new(user_id, "tester"),
            message: None,
            data: Some(data.to_string()),
        }),
    )
}

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Handler that appends `tag` to `log` and returns `flow`.
pub fn recording(log: &Log, tag: &'static str, flow: Flow) -> impl Handler {
    let log = log.clone();
    handler_fn(move |_ctx: Context| {
        let log = log.clone();
        async move {
            log.lock().push(tag.to_string());
            Ok(flow)
        }
    })
}

/// Handler that appends the event's sequence id to `log`.
pub fn sequence_recorder(log: &Log) -> impl Handler {
    let log = log.clone();
    handler_fn(move |ctx: Context| {
        let log = log.clone();
        async move {
            log.lock().push(ctx.event().sequence_id.to_string());
            Ok(Flow::Handled)
        }
    })
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

pub struct StaticResolver;

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        Ok(vec![SocketAddr::from(([10, 0, 0, 1], port))])
    }
}

type Script = dyn Fn(usize) -> u16 + Send + Sync;

/// Connector whose sessions answer call number `n` with `script(n)`.
pub struct ScriptedConnector {
    script: Arc<Script>,
    pub connects: AtomicUsize,
    pub calls: Arc<AtomicUsize>,
    pub paths: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new(script: impl Fn(usize) -> u16 + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(script),
            connects: AtomicUsize::new(0),
            calls: Arc::new(AtomicUsize::new(0)),
            paths: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    calls: Arc<AtomicUsize>,
    paths: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().push(request.path.clone());
        let status = (self.script)(n);
        Ok(ApiResponse {
            status,
            body: json!({ "ok": status < 400 }),
        })
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _endpoint: &Endpoint,
        _addr: SocketAddr,
    ) -> Result<Arc<dyn Session>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession {
            script: self.script.clone(),
            calls: self.calls.clone(),
            paths: self.paths.clone(),
        }))
    }
}

/// API client for `https://api.test` backed by `connector`.
pub fn scripted_client(
    connector: Arc<ScriptedConnector>,
    breaker: CircuitBreakerConfig,
    retries: RetryConfig,
) -> Arc<ApiClient> {
    let pool = ConnectionPool::new(
        ConnectionPoolConfig::default(),
        breaker,
        RetryPolicy::for_calls(&retries),
        connector,
        DnsCache::new(Duration::from_secs(300), Arc::new(StaticResolver)),
    );
    let api = ApiConfig {
        base_url: "https://api.test".to_string(),
        token: "TEST".to_string(),
    };
    Arc::new(ApiClient::new(pool, &api, &retries).unwrap())
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` receives the request path and returns the status and body; every
/// path is also appended to the returned log.
pub async fn start_programmable_backend<F, Fut>(f: F) -> (SocketAddr, Log)
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);
    let seen = log();
    let paths = seen.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let paths = paths.clone();
                    tokio::spawn(async move {
                        let Some(path) = read_request(&mut socket).await else {
                            return;
                        };
                        paths.lock().push(path.clone());
                        let (status, body) = f(path).await;
                        let status_text = match status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = http_response(status_text, &body);
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, seen)
}

/// Socket counters of a [`start_counting_backend`] server.
#[derive(Default)]
pub struct SocketStats {
    pub accepted: AtomicUsize,
    open: AtomicUsize,
    pub peak_open: AtomicUsize,
}

/// Start a backend that answers every request with `200` after `delay`,
/// closing the socket afterwards, and records how many sockets were
/// accepted and how many were open at once.
pub async fn start_counting_backend(delay: Duration) -> (SocketAddr, Arc<SocketStats>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(SocketStats::default());
    let counters = stats.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counters.accepted.fetch_add(1, Ordering::SeqCst);
            let open = counters.open.fetch_add(1, Ordering::SeqCst) + 1;
            counters.peak_open.fetch_max(open, Ordering::SeqCst);
            let counters = counters.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                if request.is_some() {
                    tokio::time::sleep(delay).await;
                }
                // Released before answering so the client's next connect
                // never overlaps this one.
                counters.open.fetch_sub(1, Ordering::SeqCst);
                if request.is_some() {
                    let body = r#"{"ok":true}"#;
                    let response = http_response("200 OK", body);
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    (addr, stats)
}

/// Read one HTTP/1.1 request and return its path.
async fn read_request(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    head.lines()
        .next()
        .and_then(|request_line| request_line.split_whitespace().nth(1))
        .map(str::to_string)
}

//! Session establishment.
//!
//! A [`Session`] is one long-lived connection to an endpoint that can carry
//! several concurrent calls. The pool opens sessions through a [`Connector`],
//! which keeps the pool independent of the wire protocol.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use super::{Endpoint, TransportError};
use crate::config::ConnectionPoolConfig;

/// One outbound API call.
#[derive(Debug, Clone, Serialize)]
pub struct ApiRequest {
    /// Path appended to the endpoint base, starting with `/`.
    pub path: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Perform one call. Any HTTP status is `Ok`; the pool classifies it.
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;

    /// False once the underlying connection is known to be unusable.
    fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Whether one session carries several calls at once. When false the
    /// pool gives each session a single stream.
    fn multiplexes(&self) -> bool {
        true
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        addr: SocketAddr,
    ) -> Result<Arc<dyn Session>, TransportError>;
}

/// HTTP connector built on `reqwest`.
///
/// Each session owns a client pinned to the resolved address, so the pool
/// decides how many connections exist instead of reqwest's own pool. Over
/// HTTP/1.1 a client opens one socket per concurrent request, so sessions
/// only multiplex with HTTP/2 prior knowledge.
pub struct HttpConnector {
    connect_timeout: Duration,
    http2_prior_knowledge: bool,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration, http2_prior_knowledge: bool) -> Self {
        Self {
            connect_timeout,
            http2_prior_knowledge,
        }
    }

    pub fn from_config(config: &ConnectionPoolConfig) -> Self {
        Self::new(config.connect_timeout(), config.http2_prior_knowledge)
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn multiplexes(&self) -> bool {
        self.http2_prior_knowledge
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        addr: SocketAddr,
    ) -> Result<Arc<dyn Session>, TransportError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(1)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .resolve(&endpoint.host, addr);
        if self.http2_prior_knowledge {
            builder = builder.http2_prior_knowledge();
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::ConnectionFailure {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Arc::new(HttpSession {
            client,
            base_url: endpoint.base_url(),
            endpoint: endpoint.to_string(),
        }))
    }
}

struct HttpSession {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
}

impl HttpSession {
    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                endpoint: self.endpoint.clone(),
            }
        } else {
            TransportError::ConnectionFailure {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let response = self
            .client
            .post(&url)
            .json(&request.payload)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        });
        Ok(ApiResponse { status, body })
    }
}

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::connector::ApiResponse;
use super::pool::ConnectionPool;
use super::{Endpoint, TransportError};
use crate::config::{ApiConfig, RetryConfig};
use crate::resilience::timeouts::Deadline;

/// Bot API client shared by all handlers.
pub struct ApiClient {
    pool: Arc<ConnectionPool>,
    endpoint: Endpoint,
    path_prefix: String,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        pool: Arc<ConnectionPool>,
        api: &ApiConfig,
        retries: &RetryConfig,
    ) -> Result<Self, TransportError> {
        let endpoint = Endpoint::parse(&api.base_url)?;
        let path_prefix = if api.token.is_empty() {
            String::new()
        } else {
            format!("/bot{}", api.token)
        };
        Ok(Self {
            pool,
            endpoint,
            path_prefix,
            request_timeout: retries.request_timeout(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Call an API method such as `sendMessage`.
    pub async fn call(&self, method: &str, payload: Value) -> Result<ApiResponse, TransportError> {
        let path = format!("{}/{}", self.path_prefix, method.trim_start_matches('/'));
        self.pool
            .invoke(&self.endpoint, &path, payload, Deadline::after(self.request_timeout))
            .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> Result<ApiResponse, TransportError> {
        self.call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<ApiResponse, TransportError> {
        let mut payload = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            payload["text"] = Value::String(text.to_string());
        }
        self.call("answerCallbackQuery", payload).await
    }
}

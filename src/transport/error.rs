use serde_json::Value;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitOpenError;

/// Failure of an outbound call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("call to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailure { endpoint: String, reason: String },

    #[error("{endpoint} answered with status {status}")]
    Remote {
        endpoint: String,
        status: u16,
        body: Value,
    },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("no session for {endpoint} became available within {waited:?}")]
    PoolExhausted { endpoint: String, waited: Duration },

    #[error("connection pool is shut down")]
    PoolClosed,

    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// Timeouts, connection failures and 5xx answers may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. } | TransportError::ConnectionFailure { .. } => true,
            TransportError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this outcome counts as an endpoint failure for its circuit.
    /// A 4xx proves the endpoint is up, so only retryable failures count.
    pub fn counts_against_circuit(&self) -> bool {
        self.is_retryable()
    }

    /// Failures of a call that went out to the endpoint. Rejections by the
    /// pool or an open circuit never left the process.
    pub fn is_call_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. }
                | TransportError::ConnectionFailure { .. }
                | TransportError::Remote { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            TransportError::Timeout { .. } => "timeout",
            TransportError::ConnectionFailure { .. } => "connection_failure",
            TransportError::Remote { status, .. } if *status >= 500 => "server_error",
            TransportError::Remote { .. } => "client_error",
            TransportError::CircuitOpen(_) => "circuit_open",
            TransportError::PoolExhausted { .. } => "pool_exhausted",
            TransportError::PoolClosed => "pool_closed",
            TransportError::InvalidEndpoint(_) => "invalid_endpoint",
        }
    }
}

//! Handler failure classification.
//!
//! # Design Decisions
//! - Transient failures are retried by the worker pool with backoff
//! - Permanent failures go straight to the dead letter store
//! - Transport errors classify themselves: timeouts, connection failures,
//!   5xx and open circuits are transient; 4xx and bad endpoints are permanent

use std::fmt::Display;

use crate::storage::StorageError;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(reason: impl Display) -> Self {
        HandlerError::Transient(reason.to_string())
    }

    pub fn permanent(reason: impl Display) -> Self {
        HandlerError::Permanent(reason.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            HandlerError::Transient(r) | HandlerError::Permanent(r) => r,
        }
    }
}

impl From<TransportError> for HandlerError {
    fn from(err: TransportError) -> Self {
        let retry_later = err.is_retryable()
            || matches!(
                err,
                TransportError::CircuitOpen(_) | TransportError::PoolExhausted { .. }
            );
        if retry_later {
            HandlerError::Transient(err.to_string())
        } else {
            HandlerError::Permanent(err.to_string())
        }
    }
}

impl From<StorageError> for HandlerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(_) => HandlerError::Transient(err.to_string()),
            StorageError::Serialization(_) => HandlerError::Permanent(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitOpenError;
    use std::time::Duration;

    #[test]
    fn transport_errors_are_classified() {
        let timeout = TransportError::Timeout {
            endpoint: "https://api:443".into(),
        };
        assert!(HandlerError::from(timeout).is_transient());

        let server = TransportError::Remote {
            endpoint: "https://api:443".into(),
            status: 502,
            body: serde_json::Value::Null,
        };
        assert!(HandlerError::from(server).is_transient());

        let client = TransportError::Remote {
            endpoint: "https://api:443".into(),
            status: 400,
            body: serde_json::Value::Null,
        };
        assert!(!HandlerError::from(client).is_transient());

        let open = TransportError::CircuitOpen(CircuitOpenError {
            endpoint: "https://api:443".into(),
            retry_after: Duration::from_secs(1),
        });
        assert!(HandlerError::from(open).is_transient());
    }
}

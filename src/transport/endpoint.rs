use serde::Serialize;
use std::fmt;
use url::Url;

use super::TransportError;

/// Scheme, host and port identifying one upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Parse the origin of `url`; path and query are ignored.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|_| TransportError::InvalidEndpoint(url.to_string()))?;
        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(TransportError::InvalidEndpoint(url.to_string()));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidEndpoint(url.to_string()))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidEndpoint(url.to_string()))?;
        // IPv6 literals come back bracketed
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self::new(scheme, host, port))
    }

    /// `scheme://host:port`, suitable as a request base.
    pub fn base_url(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

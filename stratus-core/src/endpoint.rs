//! Endpoint identity for remote processes.

use std::net::SocketAddr;
use std::str::FromStr;

/// Error returned when parsing an endpoint from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid endpoint: {0}")]
pub struct EndpointParseError(pub String);

/// A host+port pair identifying a remote process.
///
/// Endpoints are immutable once created and serve as the key of the
/// connection cache and the health monitor.
///
/// ## Example
///
/// ```rust
/// use stratus_core::Endpoint;
///
/// let ep: Endpoint = "10.0.0.1:9000".parse().unwrap();
/// assert_eq!(ep.host(), "10.0.0.1");
/// assert_eq!(ep.port(), 9000);
/// assert_eq!(ep.to_string(), "10.0.0.1:9000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the host portion.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the port portion.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the endpoint as a `(host, port)` pair suitable for
    /// `std::net::ToSocketAddrs`.
    #[must_use]
    pub fn addr(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError(s.to_string()))?;

        if host.is_empty() {
            return Err(EndpointParseError(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

//! Overlay transport layer.
//!
//! Overlay nodes are addressed by `scheme://host:port` strings. The scheme names
//! the role the operator had in mind (`http`/`tcp` for bootstrap and indexer
//! nodes, `relay` for relays, `overlay` for peers) but every node speaks the same
//! framed protocol over TCP, so dialing only needs the authority part.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use url::Url;

/// A trait object combining AsyncRead + AsyncWrite + Unpin + Send
/// We use a custom trait to avoid the E0225 error with multiple non-auto traits
pub trait StreamTrait: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for any type that satisfies the constraints
impl<T> StreamTrait for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type alias for dynamic stream. Direct and relay-bridged peer connections
/// are both handed around as this.
pub type DynStream = Pin<Box<dyn StreamTrait>>;

/// Schemes accepted in endpoint strings.
pub const SUPPORTED_SCHEMES: &[&str] = &["tcp", "http", "relay", "overlay"];

/// Scheme assumed when an endpoint is written as a bare `host:port`.
const DEFAULT_SCHEME: &str = "tcp";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid endpoint {input:?}: {reason}")]
    InvalidEndpoint { input: String, reason: String },
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("connecting to {0} timed out")]
    Timeout(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn parse(input: &str) -> Result<Self, TransportError> {
        let trimmed = input.trim();
        let invalid = |reason: &str| TransportError::InvalidEndpoint {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("empty address"));
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("{DEFAULT_SCHEME}://{trimmed}")
        };

        let url = Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;
        let scheme = url.scheme().to_ascii_lowercase();
        if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
            return Err(TransportError::UnsupportedScheme(scheme));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        Ok(Self { scheme, host, port })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, suitable for `TcpStream::connect`. IPv6 hosts keep their brackets.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Open a TCP connection to `endpoint`, giving up after `timeout`.
pub async fn dial(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, TransportError> {
    let addr = endpoint.authority();
    tracing::trace!("Dialing {}", endpoint);

    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| TransportError::Timeout(endpoint.to_string()))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Erase the concrete stream type.
pub fn boxed<S>(stream: S) -> DynStream
where
    S: StreamTrait + 'static,
{
    Box::pin(stream)
}

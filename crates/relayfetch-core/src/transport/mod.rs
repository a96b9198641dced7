//! Physical transport underneath the relay engine.
//!
//! A [`Transport`] performs exactly one request/response exchange per call
//! and owns whatever connection pool it keeps. The relay engine only needs
//! two extra capabilities from it: flushing idle connections after a timeout
//! and dropping connections to a specific peer it no longer trusts.

mod curl;

pub use self::curl::{CurlOptions, CurlTransport};

use crate::body::Body;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::fmt;
use std::net::SocketAddr;

/// Phase of the exchange in which a transport error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Resolving or connecting to the peer.
    Connect,
    /// Sending the request.
    Write,
    /// Receiving the response.
    Read,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operation::Connect => "connect",
            Operation::Write => "write",
            Operation::Read => "read",
        };
        f.write_str(text)
    }
}

/// Error reported by a [`Transport`] for a failed exchange.
///
/// Carries the optional signals the relay engine classifies on: whether the
/// failure was time-based and which phase of the exchange it happened in.
#[derive(Debug)]
pub struct TransportError {
    timed_out: bool,
    operation: Option<Operation>,
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    pub fn new<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            timed_out: false,
            operation: None,
            source: source.into(),
        }
    }

    /// Mark the error as a timeout.
    pub fn with_timeout(mut self) -> Self {
        self.timed_out = true;
        self
    }

    /// Tag the phase of the exchange that failed.
    pub fn during(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }

    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.operation, self.timed_out) {
            (Some(op), true) => write!(f, "{} timed out: {}", op, self.source),
            (Some(op), false) => write!(f, "{} failed: {}", op, self.source),
            (None, true) => write!(f, "timed out: {}", self.source),
            (None, false) => write!(f, "{}", self.source),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Response extension: socket address of the peer that produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Request extension: send the request through this HTTP forward proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute(pub url::Url);

/// Performs physical request/response exchanges.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return the response as received.
    async fn perform(&self, request: Request<Bytes>) -> Result<Response<Body>, TransportError>;

    /// Drop idle pooled connections so a frozen one is not reused. Best effort.
    fn discard_stale_connections(&self);

    /// Drop pooled connections to `addr`. Returns false when none were found.
    fn discard_connections_to(&self, addr: SocketAddr) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn display_includes_phase_and_timeout() {
        let err = TransportError::new(io::Error::new(io::ErrorKind::Other, "stalled"))
            .with_timeout()
            .during(Operation::Read);
        assert_eq!(err.to_string(), "read timed out: stalled");
        assert!(err.is_timeout());
        assert_eq!(err.operation(), Some(Operation::Read));
    }

    #[test]
    fn plain_error_has_no_signals() {
        let err = TransportError::new("connection refused");
        assert!(!err.is_timeout());
        assert_eq!(err.operation(), None);
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn source_is_preserved() {
        use std::error::Error as _;
        let err = TransportError::new(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"))
            .during(Operation::Write);
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "pipe");
    }
}

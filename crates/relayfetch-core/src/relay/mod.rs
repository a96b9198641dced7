//! Relay identities and the pool that selects, encodes for and decodes from them.
//!
//! The retry loop never looks inside a relay's wire format; it only asks the
//! [`RelayPool`] to pick an identity, wrap a request for it, unwrap what came
//! back and, after an overload signal, to stop preferring that identity.

mod codec;
mod servers;

pub use codec::{ForwardProxyCodec, RELAY_STATUS_HEADER};
pub use servers::{RelayServers, RelayStats};

use crate::body::Body;
use bytes::Bytes;
use http::{Method, Request, Response};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A relay front-end the engine can send a request through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayIdentity {
    endpoint: url::Url,
}

#[derive(Debug, Error)]
pub enum RelayIdentityError {
    #[error("invalid relay endpoint {endpoint:?}: {source}")]
    Parse {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("relay endpoint {0:?} has no host")]
    MissingHost(String),
}

impl RelayIdentity {
    /// Parse a relay endpoint such as `http://relay.example.net:8080`.
    pub fn parse(endpoint: &str) -> Result<Self, RelayIdentityError> {
        let parsed = url::Url::parse(endpoint).map_err(|source| RelayIdentityError::Parse {
            endpoint: endpoint.to_string(),
            source,
        })?;
        if parsed.host_str().is_none() {
            return Err(RelayIdentityError::MissingHost(endpoint.to_string()));
        }
        Ok(Self { endpoint: parsed })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// `host[:port]` of the relay, for logs.
    pub fn host(&self) -> String {
        match (self.endpoint.host_str(), self.endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => self.endpoint.to_string(),
        }
    }
}

impl fmt::Display for RelayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host())
    }
}

/// Failure to wrap a request for a relay or to unwrap its response.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("relay cannot carry {0} requests")]
    UnsupportedMethod(Method),
    #[error("invalid relay status header: {0:?}")]
    InvalidStatus(String),
    #[error("malformed relay response: {0}")]
    Malformed(String),
}

/// Response extension linking a decoded response to the request that caused it.
#[derive(Debug, Clone)]
pub struct OriginRequest(pub Arc<Request<Bytes>>);

/// Wire format spoken with a relay.
pub trait RelayCodec: Send + Sync {
    fn encode(
        &self,
        request: &Request<Bytes>,
        relay: &RelayIdentity,
    ) -> Result<Request<Bytes>, CodecError>;

    fn decode(&self, response: Response<Body>) -> Result<Response<Body>, CodecError>;
}

/// Selection, encoding and load feedback for a set of relays.
///
/// Implementations are shared by concurrent calls and must synchronise
/// their own state.
pub trait RelayPool: Send + Sync {
    /// Pick the relay for `attempt` (0-based) of `request`.
    fn select(&self, request: &Request<Bytes>, attempt: usize) -> RelayIdentity;

    fn encode(
        &self,
        request: &Request<Bytes>,
        relay: &RelayIdentity,
    ) -> Result<Request<Bytes>, CodecError>;

    fn decode(&self, response: Response<Body>) -> Result<Response<Body>, CodecError>;

    /// The relay reported overload; prefer others for a while.
    fn deprioritize(&self, relay: &RelayIdentity);
}

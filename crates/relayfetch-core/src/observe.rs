//! Events emitted by the retry loop at each classification point.
//!
//! The loop calls the observer synchronously; [`TracingObserver`] turns the
//! events into log records. Tests install their own observer to assert on
//! the branches taken.

use crate::relay::RelayIdentity;
use crate::retry::{FailureClass, RelayFault};
use bytes::Bytes;
use http::{Request, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// The transport failed. `will_retry` is false on the last attempt.
    TransportFailed {
        attempt: usize,
        relay: RelayIdentity,
        class: FailureClass,
        error: String,
        will_retry: bool,
    },
    /// Idle connections were flushed after a timeout-like failure.
    ConnectionsFlushed { attempt: usize, relay: RelayIdentity },
    /// Last attempt got a non-200 wrapper status; returned undecoded.
    WrapperPassThrough {
        attempt: usize,
        relay: RelayIdentity,
        status: StatusCode,
    },
    /// 503 from the relay: deprioritized, backing off.
    RelayOverloaded {
        attempt: usize,
        relay: RelayIdentity,
        backoff: Duration,
    },
    /// Wrapper status suggests the responder is not a genuine relay.
    SuspectResponder {
        attempt: usize,
        relay: RelayIdentity,
        status: StatusCode,
    },
    /// Responder's IP added to the blacklist.
    AddressBlacklisted {
        attempt: usize,
        addr: SocketAddr,
        ttl: Duration,
    },
    /// Could not tell which address produced a suspect response.
    RemoteAddrUnknown { attempt: usize, relay: RelayIdentity },
    /// Closing pooled connections to a suspect address found none.
    DiscardFailed { attempt: usize, addr: SocketAddr },
    /// Other non-200 wrapper status; retrying without delay.
    WrapperStatusRetry {
        attempt: usize,
        relay: RelayIdentity,
        status: StatusCode,
    },
    /// Decoded 502 carried a transient relay fault.
    RelayFault {
        attempt: usize,
        relay: RelayIdentity,
        fault: RelayFault,
        backoff: Option<Duration>,
    },
}

impl RetryEvent {
    pub fn attempt(&self) -> usize {
        match self {
            RetryEvent::TransportFailed { attempt, .. }
            | RetryEvent::ConnectionsFlushed { attempt, .. }
            | RetryEvent::WrapperPassThrough { attempt, .. }
            | RetryEvent::RelayOverloaded { attempt, .. }
            | RetryEvent::SuspectResponder { attempt, .. }
            | RetryEvent::AddressBlacklisted { attempt, .. }
            | RetryEvent::RemoteAddrUnknown { attempt, .. }
            | RetryEvent::DiscardFailed { attempt, .. }
            | RetryEvent::WrapperStatusRetry { attempt, .. }
            | RetryEvent::RelayFault { attempt, .. } => *attempt,
        }
    }
}

pub trait RetryObserver: Send + Sync {
    fn on_event(&self, request: &Request<Bytes>, event: &RetryEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_event(&self, request: &Request<Bytes>, event: &RetryEvent) {
        let method = request.method();
        let uri = request.uri();
        match event {
            RetryEvent::TransportFailed {
                attempt,
                relay,
                class,
                error,
                will_retry,
            } => tracing::warn!(
                attempt,
                relay = %relay,
                ?class,
                will_retry,
                "{} {} transport error: {}",
                method,
                uri,
                error
            ),
            RetryEvent::ConnectionsFlushed { attempt, relay } => tracing::warn!(
                attempt,
                relay = %relay,
                "{} {} timed out, discarded idle connections",
                method,
                uri
            ),
            RetryEvent::WrapperPassThrough {
                attempt,
                relay,
                status,
            } => tracing::warn!(
                attempt,
                relay = %relay,
                status = status.as_u16(),
                "{} {} out of attempts, returning relay response as-is",
                method,
                uri
            ),
            RetryEvent::RelayOverloaded {
                attempt,
                relay,
                backoff,
            } => tracing::warn!(
                attempt,
                relay = %relay,
                backoff_ms = backoff.as_millis() as u64,
                "relay over quota, switching to next relay"
            ),
            RetryEvent::SuspectResponder {
                attempt,
                relay,
                status,
            } => tracing::warn!(
                attempt,
                relay = %relay,
                status = status.as_u16(),
                "response does not look like it came from the relay"
            ),
            RetryEvent::AddressBlacklisted { attempt, addr, ttl } => tracing::warn!(
                attempt,
                ip = %addr.ip(),
                ttl_secs = ttl.as_secs(),
                "not a relay address, blacklisted"
            ),
            RetryEvent::RemoteAddrUnknown { attempt, relay } => tracing::debug!(
                attempt,
                relay = %relay,
                "suspect response carries no remote address"
            ),
            RetryEvent::DiscardFailed { attempt, addr } => tracing::warn!(
                attempt,
                %addr,
                "no pooled connection to close for suspect address"
            ),
            RetryEvent::WrapperStatusRetry {
                attempt,
                relay,
                status,
            } => tracing::warn!(
                attempt,
                relay = %relay,
                status = status.as_u16(),
                "{} {} unexpected relay status, retrying",
                method,
                uri
            ),
            RetryEvent::RelayFault {
                attempt,
                relay,
                fault,
                backoff,
            } => tracing::debug!(
                attempt,
                relay = %relay,
                ?fault,
                backoff_ms = backoff.map(|d| d.as_millis() as u64),
                "{} {} relay fetch failed, retrying",
                method,
                uri
            ),
        }
    }
}

//! Retry loop: drive one relayed request to exactly one outcome.

use super::classify::{
    classify_relay_body, classify_transport_error, classify_wrapper_status, WrapperVerdict,
};
use super::error::RelayError;
use super::policy::{deadline_after, Attempt, RetrySettings};
use crate::blacklist::AddressBlacklist;
use crate::body::Body;
use crate::observe::{RetryEvent, RetryObserver, TracingObserver};
use crate::relay::{OriginRequest, RelayIdentity, RelayPool};
use crate::transport::{Transport, TransportError};
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Instant;

/// HTTP transport that tunnels every request through a relay pool.
///
/// Attempts are strictly sequential. Encode, decode and body-read failures
/// end the call at once; network failures and relay load signals are retried
/// until the attempt budget runs out, and the last attempt always returns
/// whatever it got.
pub struct RelayTransport {
    transport: Arc<dyn Transport>,
    pool: Arc<dyn RelayPool>,
    blacklist: Option<Arc<dyn AddressBlacklist>>,
    observer: Arc<dyn RetryObserver>,
    settings: RetrySettings,
}

impl RelayTransport {
    pub fn new(
        transport: Arc<dyn Transport>,
        pool: Arc<dyn RelayPool>,
        settings: RetrySettings,
    ) -> Self {
        Self {
            transport,
            pool,
            blacklist: None,
            observer: Arc::new(TracingObserver),
            settings,
        }
    }

    /// Blacklist the source IP of responses that did not come from a relay.
    pub fn with_blacklist(mut self, blacklist: Arc<dyn AddressBlacklist>) -> Self {
        self.blacklist = Some(blacklist);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Send `request` through the relay pool.
    pub async fn execute(&self, request: Request<Bytes>) -> Result<Response<Body>, RelayError> {
        let request = Arc::new(request);

        for index in 0..self.settings.max_attempts {
            let attempt = self.settings.attempt(index);
            let relay = self.pool.select(&request, index);
            let encoded = self
                .pool
                .encode(&request, &relay)
                .map_err(|source| RelayError::Encode {
                    relay: relay.clone(),
                    source,
                })?;

            let raw = match self.transport.perform(encoded).await {
                Ok(raw) => raw,
                Err(error) => {
                    self.on_transport_error(&request, attempt, &relay, &error);
                    if attempt.is_last() {
                        return Err(RelayError::Transport {
                            relay,
                            source: error,
                        });
                    }
                    continue;
                }
            };

            if raw.status() != StatusCode::OK {
                if attempt.is_last() {
                    self.emit(
                        &request,
                        RetryEvent::WrapperPassThrough {
                            attempt: index,
                            relay,
                            status: raw.status(),
                        },
                    );
                    return Ok(raw);
                }
                self.on_wrapper_status(&request, attempt, &relay, raw).await;
                continue;
            }

            let mut decoded = self
                .pool
                .decode(raw)
                .map_err(|source| RelayError::Decode {
                    relay: relay.clone(),
                    source,
                })?;
            decoded
                .extensions_mut()
                .insert(OriginRequest(Arc::clone(&request)));

            if attempt.is_last() || decoded.status() != StatusCode::BAD_GATEWAY {
                return Ok(decoded);
            }

            // Drained and closed here; restored below if it is the final answer.
            let body = std::mem::take(decoded.body_mut())
                .into_bytes()
                .map_err(|source| RelayError::ReadBody {
                    relay: relay.clone(),
                    source,
                })?;

            let Some(fault) = classify_relay_body(&body) else {
                *decoded.body_mut() = Body::from(body);
                return Ok(decoded);
            };
            let backoff = fault.backs_off().then_some(self.settings.backoff_delay);
            self.emit(
                &request,
                RetryEvent::RelayFault {
                    attempt: index,
                    relay,
                    fault,
                    backoff,
                },
            );
            if let Some(delay) = backoff {
                tokio::time::sleep(delay).await;
            }
        }

        Err(RelayError::AttemptsExhausted {
            attempts: self.settings.max_attempts,
        })
    }

    fn on_transport_error(
        &self,
        request: &Request<Bytes>,
        attempt: Attempt,
        relay: &RelayIdentity,
        error: &TransportError,
    ) {
        let class = classify_transport_error(error);
        if class.flushes_connections() {
            // A frozen connection must not serve the next attempt.
            self.transport.discard_stale_connections();
            self.emit(
                request,
                RetryEvent::ConnectionsFlushed {
                    attempt: attempt.index,
                    relay: relay.clone(),
                },
            );
        }
        self.emit(
            request,
            RetryEvent::TransportFailed {
                attempt: attempt.index,
                relay: relay.clone(),
                class,
                error: error.to_string(),
                will_retry: !attempt.is_last(),
            },
        );
    }

    /// Handle a non-200 wrapper status on a non-final attempt.
    async fn on_wrapper_status(
        &self,
        request: &Request<Bytes>,
        attempt: Attempt,
        relay: &RelayIdentity,
        raw: Response<Body>,
    ) {
        let status = raw.status();
        match classify_wrapper_status(status) {
            WrapperVerdict::Overloaded => {
                drop(raw);
                self.pool.deprioritize(relay);
                self.emit(
                    request,
                    RetryEvent::RelayOverloaded {
                        attempt: attempt.index,
                        relay: relay.clone(),
                        backoff: self.settings.backoff_delay,
                    },
                );
                tokio::time::sleep(self.settings.backoff_delay).await;
            }
            WrapperVerdict::SuspectNotGenuine => {
                self.emit(
                    request,
                    RetryEvent::SuspectResponder {
                        attempt: attempt.index,
                        relay: relay.clone(),
                        status,
                    },
                );
                self.distrust_responder(request, attempt, relay, &raw);
            }
            WrapperVerdict::Other => self.emit(
                request,
                RetryEvent::WrapperStatusRetry {
                    attempt: attempt.index,
                    relay: relay.clone(),
                    status,
                },
            ),
        }
    }

    /// Blacklist the peer behind a suspect response and drop connections to it.
    /// No-op without a blacklist manager.
    fn distrust_responder(
        &self,
        request: &Request<Bytes>,
        attempt: Attempt,
        relay: &RelayIdentity,
        raw: &Response<Body>,
    ) {
        let Some(blacklist) = &self.blacklist else {
            return;
        };
        let addr = match blacklist.remote_addr(raw) {
            Ok(addr) => addr,
            Err(_) => {
                self.emit(
                    request,
                    RetryEvent::RemoteAddrUnknown {
                        attempt: attempt.index,
                        relay: relay.clone(),
                    },
                );
                return;
            }
        };

        let ttl = self.settings.blacklist_ttl;
        blacklist.blacklist(addr.ip(), deadline_after(Instant::now(), ttl));
        self.emit(
            request,
            RetryEvent::AddressBlacklisted {
                attempt: attempt.index,
                addr,
                ttl,
            },
        );
        if !self.transport.discard_connections_to(addr) {
            self.emit(
                request,
                RetryEvent::DiscardFailed {
                    attempt: attempt.index,
                    addr,
                },
            );
        }
    }

    fn emit(&self, request: &Request<Bytes>, event: RetryEvent) {
        self.observer.on_event(request, &event);
    }
}

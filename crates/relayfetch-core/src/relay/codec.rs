//! Relays that behave as plain HTTP forward proxies.
//!
//! The request is sent unchanged through the relay endpoint. The wrapper
//! status belongs to the relay: a relay that fetched the target answers 200
//! and reports the upstream status in `x-relay-status`, which the decoder
//! restores. Any other wrapper status is the relay's own verdict and never
//! reaches the decoder.

use super::{CodecError, RelayCodec, RelayIdentity};
use crate::body::Body;
use crate::transport::ProxyRoute;
use bytes::Bytes;
use http::header::HeaderName;
use http::{Method, Request, Response, StatusCode};

/// Header carrying the upstream status in a relay-wrapped response.
pub const RELAY_STATUS_HEADER: HeaderName = HeaderName::from_static("x-relay-status");

#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardProxyCodec;

impl RelayCodec for ForwardProxyCodec {
    fn encode(
        &self,
        request: &Request<Bytes>,
        relay: &RelayIdentity,
    ) -> Result<Request<Bytes>, CodecError> {
        if request.method() == Method::CONNECT {
            return Err(CodecError::UnsupportedMethod(Method::CONNECT));
        }
        let mut encoded = Request::new(request.body().clone());
        *encoded.method_mut() = request.method().clone();
        *encoded.uri_mut() = request.uri().clone();
        *encoded.version_mut() = request.version();
        *encoded.headers_mut() = request.headers().clone();
        encoded
            .extensions_mut()
            .insert(ProxyRoute(relay.endpoint().clone()));
        Ok(encoded)
    }

    fn decode(&self, mut response: Response<Body>) -> Result<Response<Body>, CodecError> {
        // Without the header the 200 could be anyone's, e.g. an interception page.
        let Some(value) = response.headers_mut().remove(&RELAY_STATUS_HEADER) else {
            return Err(CodecError::Malformed(format!(
                "wrapper response has no {RELAY_STATUS_HEADER} header"
            )));
        };
        let status = value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or_else(|| {
                CodecError::InvalidStatus(String::from_utf8_lossy(value.as_bytes()).into_owned())
            })?;
        *response.status_mut() = status;
        Ok(response)
    }
}

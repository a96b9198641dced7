//! libcurl-backed transport.
//!
//! Each `Easy` handle keeps its own connection cache, so idle handles are
//! pooled and reused across exchanges. Transfers run on the blocking pool.
//!
//! With an [`IpBlacklist`] attached, pooled handles connected to a listed
//! address are dropped instead of reused, and listed addresses are kept out of
//! name resolution for the host being dialled.

use super::{Operation, ProxyRoute, RemoteAddr, Transport, TransportError};
use crate::blacklist::IpBlacklist;
use crate::body::Body;
use async_trait::async_trait;
use bytes::Bytes;
use curl::easy::{Easy, List};
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Timeouts and pool size for [`CurlTransport`].
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Hard limit for one whole exchange.
    pub request_timeout: Duration,
    /// Idle handles kept for reuse.
    pub max_idle_handles: usize,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(60),
            max_idle_handles: 16,
        }
    }
}

/// Idle curl handle and the peer its cached connection points at.
struct PooledHandle {
    easy: Easy,
    peer: Option<SocketAddr>,
}

pub struct CurlTransport {
    idle: Mutex<Vec<PooledHandle>>,
    options: CurlOptions,
    blacklist: Option<Arc<IpBlacklist>>,
}

impl CurlTransport {
    pub fn new(options: CurlOptions) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            options,
            blacklist: None,
        }
    }

    /// Never dial or reuse a connection to an address listed in `blacklist`.
    pub fn with_blacklist(mut self, blacklist: Arc<IpBlacklist>) -> Self {
        self.blacklist = Some(blacklist);
        self
    }

    /// Number of idle handles currently pooled.
    pub fn idle_handles(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<PooledHandle>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checkout(&self) -> PooledHandle {
        let mut idle = self.lock_idle();
        while let Some(handle) = idle.pop() {
            match (&self.blacklist, handle.peer) {
                (Some(blacklist), Some(peer)) if blacklist.is_blacklisted(peer.ip()) => {
                    tracing::debug!(%peer, "dropping pooled handle to blacklisted peer");
                }
                _ => return handle,
            }
        }
        PooledHandle {
            easy: Easy::new(),
            peer: None,
        }
    }

    fn checkin(&self, handle: PooledHandle) {
        let mut idle = self.lock_idle();
        if idle.len() < self.options.max_idle_handles {
            idle.push(handle);
        }
    }
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new(CurlOptions::default())
    }
}

#[async_trait]
impl Transport for CurlTransport {
    async fn perform(&self, request: Request<Bytes>) -> Result<Response<Body>, TransportError> {
        let mut handle = self.checkout();
        let options = self.options;
        let blacklist = self.blacklist.clone();
        let (handle, result) = tokio::task::spawn_blocking(move || {
            let result = exchange(&mut handle, &request, &options, blacklist.as_deref());
            (handle, result)
        })
        .await
        .map_err(TransportError::new)?;

        // A handle whose transfer failed may hold a broken connection; let it go.
        if result.is_ok() {
            self.checkin(handle);
        }
        result
    }

    fn discard_stale_connections(&self) {
        let dropped = {
            let mut idle = self.lock_idle();
            let n = idle.len();
            idle.clear();
            n
        };
        tracing::debug!(dropped, "discarded idle curl handles");
    }

    fn discard_connections_to(&self, addr: SocketAddr) -> bool {
        let mut idle = self.lock_idle();
        let before = idle.len();
        idle.retain(|h| h.peer != Some(addr));
        before != idle.len()
    }
}

/// Run one transfer on `handle`. Blocks the current thread.
fn exchange(
    handle: &mut PooledHandle,
    request: &Request<Bytes>,
    options: &CurlOptions,
    blacklist: Option<&IpBlacklist>,
) -> Result<Response<Body>, TransportError> {
    let easy = &mut handle.easy;
    // reset() clears options but keeps the connection cache.
    easy.reset();
    configure(easy, request, options).map_err(map_curl_error)?;
    if let Some(blacklist) = blacklist {
        avoid_blacklisted(easy, request, blacklist)?;
    }

    let mut header_lines: Vec<String> = Vec::new();
    let mut body: Vec<u8> = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    let line = s.trim_end();
                    // A new status line starts a new header block (proxy CONNECT, 1xx).
                    if line.starts_with("HTTP/") {
                        header_lines.clear();
                    }
                    header_lines.push(line.to_string());
                }
                true
            })
            .map_err(map_curl_error)?;
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(map_curl_error)?;
        transfer.perform().map_err(map_curl_error)?;
    }

    let peer = peer_addr(easy);
    let code = easy.response_code().map_err(map_curl_error)?;
    handle.peer = peer;
    build_response(code, &header_lines, body, peer)
}

fn configure(
    easy: &mut Easy,
    request: &Request<Bytes>,
    options: &CurlOptions,
) -> Result<(), curl::Error> {
    easy.url(&request.uri().to_string())?;
    easy.connect_timeout(options.connect_timeout)?;
    easy.timeout(options.request_timeout)?;

    if let Some(ProxyRoute(proxy)) = request.extensions().get::<ProxyRoute>() {
        easy.proxy(proxy.as_str())?;
    }

    let method = request.method();
    if method == Method::HEAD {
        easy.nobody(true)?;
    } else if method != Method::GET {
        if method == Method::POST || !request.body().is_empty() {
            easy.post_fields_copy(request.body())?;
        }
        if method != Method::POST {
            easy.custom_request(method.as_str())?;
        }
    }

    let mut list = List::new();
    for (name, value) in request.headers() {
        match value.to_str() {
            Ok(v) => list.append(&format!("{}: {}", name.as_str(), v.trim()))?,
            Err(_) => tracing::debug!(header = %name, "skipping non-ASCII header value"),
        }
    }
    // Never wait for a 100-continue round trip.
    list.append("Expect:")?;
    easy.http_headers(list)?;
    Ok(())
}

/// Host and port curl connects to for `request`: the relay when proxied,
/// otherwise the origin.
fn dial_target(request: &Request<Bytes>) -> Option<(String, u16)> {
    let (host, port) = match request.extensions().get::<ProxyRoute>() {
        Some(ProxyRoute(proxy)) => (proxy.host_str()?, proxy.port_or_known_default()?),
        None => {
            let uri = request.uri();
            let port = match (uri.port_u16(), uri.scheme_str()) {
                (Some(port), _) => port,
                (None, Some("https")) => 443,
                (None, Some("http")) => 80,
                _ => return None,
            };
            (uri.host()?, port)
        }
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Some((host.to_string(), port))
}

/// Keep blacklisted addresses out of the dial.
///
/// A literal IP that is listed fails the exchange. For a host name, the
/// listed addresses are filtered from its resolution and curl is pinned to
/// the remaining ones; if none remain the exchange fails.
fn avoid_blacklisted(
    easy: &mut Easy,
    request: &Request<Bytes>,
    blacklist: &IpBlacklist,
) -> Result<(), TransportError> {
    if blacklist.is_empty() {
        return Ok(());
    }
    let Some((host, port)) = dial_target(request) else {
        return Ok(());
    };

    let refused = || {
        TransportError::new(format!("every address of {host}:{port} is blacklisted"))
            .during(Operation::Connect)
    };
    if let Ok(ip) = host.parse::<IpAddr>() {
        return if blacklist.is_blacklisted(ip) {
            Err(refused())
        } else {
            Ok(())
        };
    }

    let resolved: Vec<IpAddr> = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| TransportError::new(e).during(Operation::Connect))?
        .map(|addr| addr.ip())
        .collect();
    let allowed: Vec<IpAddr> = resolved
        .iter()
        .copied()
        .filter(|ip| !blacklist.is_blacklisted(*ip))
        .collect();
    if allowed.is_empty() {
        return Err(refused());
    }
    if allowed.len() < resolved.len() {
        let addrs: Vec<String> = allowed
            .iter()
            .map(|ip| match ip {
                IpAddr::V4(v4) => v4.to_string(),
                IpAddr::V6(v6) => format!("[{v6}]"),
            })
            .collect();
        let mut pins = List::new();
        pins.append(&format!("{host}:{port}:{}", addrs.join(",")))
            .map_err(map_curl_error)?;
        easy.resolve(pins).map_err(map_curl_error)?;
        tracing::debug!(
            %host,
            port,
            skipped = resolved.len() - allowed.len(),
            "pinned resolution away from blacklisted addresses"
        );
    }
    Ok(())
}

fn peer_addr(easy: &mut Easy) -> Option<SocketAddr> {
    let ip: IpAddr = easy.primary_ip().ok().flatten()?.parse().ok()?;
    let port = easy.primary_port().ok()?;
    Some(SocketAddr::new(ip, port))
}

/// Assemble the response from the last header block curl reported.
fn build_response(
    code: u32,
    header_lines: &[String],
    body: Vec<u8>,
    peer: Option<SocketAddr>,
) -> Result<Response<Body>, TransportError> {
    let status = u16::try_from(code)
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| {
            TransportError::new(format!("invalid HTTP status code {code}")).during(Operation::Read)
        })?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    for line in header_lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) else {
            continue;
        };
        response.headers_mut().append(name, value);
    }
    if let Some(addr) = peer {
        response.extensions_mut().insert(RemoteAddr(addr));
    }
    Ok(response)
}

/// Translate a curl error into the signals the relay engine classifies on.
fn map_curl_error(e: curl::Error) -> TransportError {
    let timed_out = e.is_operation_timedout();
    let operation = if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
    {
        Some(Operation::Connect)
    } else if e.is_read_error() || e.is_recv_error() || e.is_got_nothing() {
        Some(Operation::Read)
    } else if e.is_send_error() {
        Some(Operation::Write)
    } else {
        None
    };

    let mut err = TransportError::new(e);
    if timed_out {
        err = err.with_timeout();
    }
    if let Some(op) = operation {
        err = err.during(op);
    }
    err
}

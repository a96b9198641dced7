//! `relayfetch fetch` – send one request through the relay pool.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request, Response, Uri};
use relayfetch_core::blacklist::IpBlacklist;
use relayfetch_core::config::RelayfetchConfig;
use relayfetch_core::relay::{ForwardProxyCodec, RelayIdentity, RelayServers};
use relayfetch_core::retry::FailureClass;
use relayfetch_core::transport::CurlTransport;
use relayfetch_core::{Body, RelayError, RelayTransport, RetrySettings};
use std::io::Write;
use std::sync::Arc;

/// Parsed `fetch` arguments.
#[derive(Debug, Default)]
pub struct FetchArgs {
    pub url: String,
    pub method: String,
    pub headers: Vec<String>,
    pub data: Option<String>,
    pub include: bool,
    pub relays: Vec<String>,
}

pub async fn run_fetch(cfg: &RelayfetchConfig, args: FetchArgs) -> Result<()> {
    let request = build_request(&args)?;
    let relays = relay_list(cfg, &args.relays)?;
    let pool = RelayServers::new(relays, ForwardProxyCodec, cfg.overload_cooldown())
        .context("no relays configured: add `relays` to config.toml or pass --relay")?;
    let pool = Arc::new(pool);
    let blacklist = Arc::new(IpBlacklist::new());

    let curl = CurlTransport::new(cfg.curl_options()).with_blacklist(blacklist.clone());
    let transport = RelayTransport::new(
        Arc::new(curl),
        pool.clone(),
        RetrySettings::from_config(cfg),
    )
    .with_blacklist(blacklist.clone());

    tracing::info!(method = %request.method(), uri = %request.uri(), "fetch");
    let result = transport.execute(request).await;

    for stats in pool.snapshot().iter().filter(|s| s.overload_events > 0) {
        tracing::info!(
            relay = %stats.relay,
            overload_events = stats.overload_events,
            "relay reported overload"
        );
    }
    if !blacklist.is_empty() {
        tracing::info!(entries = blacklist.len(), "blacklisted non-relay addresses");
    }

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(
                retryable = err.is_retryable(),
                class = ?err.failure_class(),
                "fetch failed: {err}"
            );
            let hint = failure_hint(&err);
            return Err(anyhow::Error::new(err).context(hint));
        }
    };
    print_response(response, args.include)
}

/// One-line summary for the user of why the call gave up.
pub(crate) fn failure_hint(err: &RelayError) -> &'static str {
    match err.failure_class() {
        Some(FailureClass::Timeout) => "relays timed out on every attempt",
        Some(FailureClass::OperationFailure) => "relay connection dropped on every attempt",
        Some(FailureClass::Other) => "no relay could be reached",
        None => "relay exchange failed and was not retried",
    }
}

/// `--relay` flags win over the config file.
fn relay_list(cfg: &RelayfetchConfig, overrides: &[String]) -> Result<Vec<RelayIdentity>> {
    if overrides.is_empty() {
        return cfg.relay_identities();
    }
    overrides
        .iter()
        .map(|r| RelayIdentity::parse(r).with_context(|| format!("--relay {r:?}")))
        .collect()
}

pub(crate) fn build_request(args: &FetchArgs) -> Result<Request<Bytes>> {
    let uri: Uri = args
        .url
        .parse()
        .with_context(|| format!("invalid URL: {}", args.url))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => bail!("URL must be http or https: {}", args.url),
    }
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method: {}", args.method))?;

    let body = args
        .data
        .as_ref()
        .map(|d| Bytes::from(d.clone()))
        .unwrap_or_default();
    let mut request = Request::new(body);
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request.headers_mut().append(name, value);
    }
    Ok(request)
}

/// Parse `Name: value`.
pub(crate) fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header must look like 'Name: value': {raw:?}");
    };
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("invalid header name in {raw:?}"))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("invalid header value in {raw:?}"))?;
    Ok((name, value))
}

fn print_response(response: Response<Body>, include: bool) -> Result<()> {
    let (parts, body) = response.into_parts();
    let body = body.into_bytes().context("read response body")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if include {
        writeln!(out, "{:?} {}", parts.version, parts.status)?;
        for (name, value) in &parts.headers {
            writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(out)?;
    }
    out.write_all(&body)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayfetch_core::relay::CodecError;
    use relayfetch_core::transport::{Operation, TransportError};

    fn args(url: &str) -> FetchArgs {
        FetchArgs {
            url: url.to_string(),
            method: "GET".to_string(),
            ..FetchArgs::default()
        }
    }

    #[test]
    fn builds_get_request() {
        let req = build_request(&args("https://example.com/a?b=1")).unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri(), "https://example.com/a?b=1");
        assert!(req.body().is_empty());
    }

    #[test]
    fn builds_post_with_headers_and_body() {
        let req = build_request(&FetchArgs {
            method: "post".to_string(),
            headers: vec![
                "Content-Type: application/json".to_string(),
                "X-Trace:abc".to_string(),
            ],
            data: Some("{\"k\":1}".to_string()),
            ..args("http://example.com/submit")
        })
        .unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.headers()["content-type"], "application/json");
        assert_eq!(req.headers()["x-trace"], "abc");
        assert_eq!(req.body().as_ref(), b"{\"k\":1}");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(build_request(&args("ftp://example.com/x")).is_err());
        assert!(build_request(&args("/relative/path")).is_err());
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(parse_header("no colon here").is_err());
        assert!(parse_header("bad name: v").is_err());
        let (name, value) = parse_header("Accept:  text/plain ").unwrap();
        assert_eq!(name, "accept");
        assert_eq!(value, "text/plain");
    }

    fn relay() -> RelayIdentity {
        RelayIdentity::parse("http://127.0.0.1:3128").unwrap()
    }

    #[test]
    fn failure_hint_follows_error_class() {
        let timeout = RelayError::Transport {
            relay: relay(),
            source: TransportError::new("slow").with_timeout(),
        };
        assert_eq!(failure_hint(&timeout), "relays timed out on every attempt");

        let dropped = RelayError::Transport {
            relay: relay(),
            source: TransportError::new("eof").during(Operation::Read),
        };
        assert_eq!(failure_hint(&dropped), "relay connection dropped on every attempt");

        let refused = RelayError::Transport {
            relay: relay(),
            source: TransportError::new("refused").during(Operation::Connect),
        };
        assert_eq!(failure_hint(&refused), "no relay could be reached");

        let decode = RelayError::Decode {
            relay: relay(),
            source: CodecError::Malformed("no status".to_string()),
        };
        assert_eq!(failure_hint(&decode), "relay exchange failed and was not retried");
    }

    #[test]
    fn relay_flags_override_config() {
        let cfg = RelayfetchConfig {
            relays: vec!["http://configured.example.net".to_string()],
            ..RelayfetchConfig::default()
        };
        let from_cfg = relay_list(&cfg, &[]).unwrap();
        assert_eq!(from_cfg[0].host(), "configured.example.net");

        let overridden = relay_list(&cfg, &["http://127.0.0.1:3128".to_string()]).unwrap();
        assert_eq!(overridden.len(), 1);
        assert_eq!(overridden[0].host(), "127.0.0.1:3128");
    }
}

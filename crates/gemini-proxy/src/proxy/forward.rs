//! Outbound request construction and upstream dispatch
//!
//! Turns an inbound request into a request against the configured upstream
//! and produces an explicit [`UpstreamOutcome`] instead of treating
//! non-success statuses as exceptional control flow.

use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode, header};
use bytes::Bytes;
use url::Url;

use super::error::ProxyError;

/// Hop-by-hop headers that are never forwarded in either direction
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Extra response headers dropped when relaying a buffered response
pub const BUFFERED_STRIPPED_HEADERS: &[&str] = &["content-encoding"];

/// Extra response headers dropped when relaying a streamed response
pub const STREAMING_STRIPPED_HEADERS: &[&str] =
    &["content-length", "transfer-encoding", "content-encoding"];

/// Query parameter carrying the API key
pub const API_KEY_PARAM: &str = "key";

/// Copy inbound headers, dropping hop-by-hop ones
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    strip_headers(headers, &[])
}

/// Copy upstream response headers, dropping hop-by-hop ones and `extra`
pub fn relay_headers(headers: &HeaderMap, extra: &[&str]) -> HeaderMap {
    strip_headers(headers, extra)
}

fn strip_headers(headers: &HeaderMap, extra: &[&str]) -> HeaderMap {
    let mut kept = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        // HeaderName is always lowercase
        let name_str = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&name_str) || extra.contains(&name_str) {
            continue;
        }
        kept.append(name.clone(), value.clone());
    }
    kept
}

/// Whether the caller asked for a server-sent-event stream
pub fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/event-stream"))
}

/// Build `base + path`, carrying over the inbound query and injecting the API key
///
/// The inbound query is forwarded as sent. When a key is configured any
/// caller-supplied `key` parameter is removed and the configured one is
/// appended last.
pub fn build_upstream_url(
    base: &str,
    path: &str,
    query: Option<&str>,
    api_key: Option<&str>,
) -> Result<Url, ProxyError> {
    let joined = if path.starts_with('/') {
        format!("{}{}", base.trim_end_matches('/'), path)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path)
    };

    let mut url = Url::parse(&joined)
        .map_err(|e| ProxyError::Request(format!("Invalid upstream URL '{joined}': {e}")))?;

    let mut segments: Vec<String> = query
        .unwrap_or_default()
        .split('&')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| api_key.is_none() || !is_key_segment(segment))
        .map(str::to_string)
        .collect();

    if let Some(key) = api_key {
        let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        segments.push(format!("{API_KEY_PARAM}={encoded}"));
    }

    if segments.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&segments.join("&")));
    }

    Ok(url)
}

/// Whether a raw `name[=value]` query segment names the API key parameter
fn is_key_segment(segment: &str) -> bool {
    let name = segment.split('=').next().unwrap_or_default();
    url::form_urlencoded::parse(name.as_bytes())
        .next()
        .is_some_and(|(decoded, _)| decoded == API_KEY_PARAM)
}

/// A fully prepared request to the upstream API
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A non-error upstream reply; `B` is the buffered body or the live response
#[derive(Debug)]
pub struct UpstreamResponse<B> {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: B,
}

/// What came back from the upstream call
#[derive(Debug)]
pub enum UpstreamOutcome<B> {
    Success(UpstreamResponse<B>),
    Failure(ProxyError),
}

// The request URL carries the API key, so it is dropped from every error.
fn map_send_error(e: reqwest::Error) -> ProxyError {
    let e = e.without_url();
    if e.is_timeout() {
        ProxyError::Network(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProxyError::Network(format!("Failed to connect to upstream: {e}"))
    } else {
        ProxyError::Network(format!("Request failed: {e}"))
    }
}

fn prepare(client: &reqwest::Client, outbound: OutboundRequest) -> reqwest::RequestBuilder {
    let builder = client
        .request(outbound.method, outbound.url)
        .headers(outbound.headers);

    if outbound.body.is_empty() {
        builder
    } else {
        builder.body(outbound.body)
    }
}

/// Send the request and turn the reply into an outcome, without reading a successful body
async fn send(builder: reqwest::RequestBuilder) -> UpstreamOutcome<reqwest::Response> {
    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => return UpstreamOutcome::Failure(map_send_error(e)),
    };

    let status = response.status();
    if !status.is_success() {
        // Reading the body also hands the connection back to the pool.
        let body = response.text().await.unwrap_or_default();
        return UpstreamOutcome::Failure(ProxyError::Upstream { status, body });
    }

    UpstreamOutcome::Success(UpstreamResponse {
        status,
        headers: response.headers().clone(),
        body: response,
    })
}

/// One request/response round trip with a hard timeout
pub async fn dispatch_buffered(
    client: &reqwest::Client,
    outbound: OutboundRequest,
    timeout: Duration,
) -> UpstreamOutcome<Bytes> {
    let builder = prepare(client, outbound).timeout(timeout);

    let upstream = match send(builder).await {
        UpstreamOutcome::Success(upstream) => upstream,
        UpstreamOutcome::Failure(e) => return UpstreamOutcome::Failure(e),
    };

    match upstream.body.bytes().await.map_err(reqwest::Error::without_url) {
        Ok(body) => UpstreamOutcome::Success(UpstreamResponse {
            status: upstream.status,
            headers: upstream.headers,
            body,
        }),
        Err(e) if e.is_timeout() => UpstreamOutcome::Failure(ProxyError::Network(format!(
            "Request timed out: {e}"
        ))),
        Err(e) => UpstreamOutcome::Failure(ProxyError::Network(format!(
            "Failed to read response body: {e}"
        ))),
    }
}

/// Open a streamed call; the body is left unread for the caller to relay
pub async fn dispatch_streaming(
    client: &reqwest::Client,
    outbound: OutboundRequest,
) -> UpstreamOutcome<reqwest::Response> {
    send(prepare(client, outbound)).await
}

//! HTTP proxy server in front of the Gemini API
//!
//! Implements a transparent proxy that:
//! - Forwards every method on every path to the configured upstream
//! - Relays SSE streams chunk by chunk and buffered responses byte for byte
//! - Hands exactly one interaction record per request to the logger

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures::TryStreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::error::{GatewayError, Result};
use crate::interaction::{
    InteractionLogger, InteractionRecord, InteractionStart, LoggedBody, RequestSnapshot,
    ResponseSnapshot, content_type, snapshot_headers,
};

use super::error::ProxyError;
use super::forward::{
    BUFFERED_STRIPPED_HEADERS, OutboundRequest, STREAMING_STRIPPED_HEADERS, UpstreamOutcome,
    build_upstream_url, dispatch_buffered, dispatch_streaming, filter_request_headers,
    relay_headers, wants_event_stream,
};
use super::streaming::{StreamEnd, StreamingProxy, TeeResult};

/// Payload returned by `GET /`
pub const LIVENESS_MESSAGE: &str = "Gemini API Proxy is running";

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Proxy configuration
    pub config: ProxyConfig,
    /// HTTP client for upstream requests
    pub client: reqwest::Client,
    /// Sink for interaction records
    pub logger: InteractionLogger,
}

impl AppState {
    pub fn new(config: ProxyConfig, logger: InteractionLogger) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            config,
            client,
            logger,
        })
    }
}

/// Build the upstream HTTP client
///
/// Only the connect phase is bounded here; buffered calls add their own
/// total timeout per request so streamed responses can run as long as the
/// upstream keeps sending.
pub fn build_client(config: &ProxyConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()
        .map_err(|e| GatewayError::Proxy(format!("Failed to create HTTP client: {e}")))
}

/// The main proxy server
pub struct ProxyServer {
    config: ProxyConfig,
    logger: InteractionLogger,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, logger: InteractionLogger) -> Self {
        Self { config, logger }
    }

    /// Start the proxy server and listen for requests
    pub async fn serve(&self) -> Result<()> {
        let app_state = Arc::new(AppState::new(self.config.clone(), self.logger.clone())?);
        let app = create_router(app_state);

        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid listen address: {e}")))?;

        info!("Forwarding to upstream: {}", self.config.upstream_url);
        info!(
            "Buffered request timeout: {}s, connect timeout: {}s",
            self.config.timeout_secs, self.config.connect_timeout_secs
        );

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Proxy(format!("Failed to bind to {addr}: {e}")))?;

        info!("Proxy listening on {addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| GatewayError::Proxy(format!("Server error: {e}")))?;

        info!("Proxy server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
///
/// `GET /` is the only route answered locally; every other method on `/`
/// (including HEAD, which axum would otherwise serve from the GET handler)
/// and every other path goes to the proxy handler.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/",
            get(root_handler).head(proxy_handler).fallback(proxy_handler),
        )
        .fallback(proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness endpoint
async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": LIVENESS_MESSAGE }))
}

/// Forward any request to the upstream and log the interaction
async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let start = InteractionStart::now();
    let span = tracing::info_span!(
        "proxy",
        request_id = %start.request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    forward(state, start, request).instrument(span).await
}

async fn forward(
    state: Arc<AppState>,
    start: InteractionStart,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let raw_body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let snapshot = snapshot_request(
                &parts.method,
                &path,
                &parts.headers,
                LoggedBody::Text(String::new()),
            );
            return fail(
                &state,
                &start,
                snapshot,
                ProxyError::Request(format!("Failed to read request body: {e}")),
            );
        }
    };

    // Snapshot before the key is injected so it never reaches the record.
    let (snapshot, decode_error) =
        capture_request(&parts.method, &path, &parts.headers, &raw_body);
    if let Some(e) = decode_error {
        return fail(&state, &start, snapshot, e);
    }

    let url = match build_upstream_url(
        &state.config.upstream_url,
        &path,
        parts.uri.query(),
        state.config.api_key.as_deref(),
    ) {
        Ok(url) => url,
        Err(e) => return fail(&state, &start, snapshot, e),
    };

    let outbound = OutboundRequest {
        method: parts.method.clone(),
        url,
        headers: filter_request_headers(&parts.headers),
        body: raw_body,
    };

    if wants_event_stream(&parts.headers) {
        debug!("Handling streaming request to {}{}", state.config.upstream_url, path);
        relay_streaming(&state, start, snapshot, outbound).await
    } else {
        debug!("Handling non-streaming request to {}{}", state.config.upstream_url, path);
        relay_buffered(&state, start, snapshot, outbound).await
    }
}

fn snapshot_request(
    method: &axum::http::Method,
    path: &str,
    headers: &HeaderMap,
    body: LoggedBody,
) -> RequestSnapshot {
    RequestSnapshot {
        method: method.to_string(),
        path: path.to_string(),
        headers: snapshot_headers(headers),
        body,
    }
}

/// Snapshot the inbound request for logging
///
/// A body that claims to be JSON but does not parse is still logged (as
/// lossy text) and reported as a decode error.
fn capture_request(
    method: &axum::http::Method,
    path: &str,
    headers: &HeaderMap,
    raw_body: &Bytes,
) -> (RequestSnapshot, Option<ProxyError>) {
    match LoggedBody::decode(content_type(headers), raw_body) {
        Ok(body) => (snapshot_request(method, path, headers, body), None),
        Err(e) => (
            snapshot_request(method, path, headers, LoggedBody::lossy(raw_body)),
            Some(ProxyError::Decode(format!("request body is not valid JSON: {e}"))),
        ),
    }
}

async fn relay_buffered(
    state: &AppState,
    start: InteractionStart,
    request: RequestSnapshot,
    outbound: OutboundRequest,
) -> Response {
    let timeout = Duration::from_secs(state.config.timeout_secs);

    let upstream = match dispatch_buffered(&state.client, outbound, timeout).await {
        UpstreamOutcome::Success(upstream) => upstream,
        UpstreamOutcome::Failure(e) => return fail(state, &start, request, e),
    };

    let logged_body = match LoggedBody::decode(content_type(&upstream.headers), &upstream.body) {
        Ok(body) => body,
        Err(e) => {
            return fail(
                state,
                &start,
                request,
                ProxyError::Decode(format!("upstream response body is not valid JSON: {e}")),
            );
        }
    };

    let response_snapshot = ResponseSnapshot {
        status: upstream.status.as_u16(),
        headers: snapshot_headers(&upstream.headers),
        body: logged_body,
    };

    // The raw upstream bytes go to the client, not the decoded form.
    let response = build_response(
        upstream.status,
        relay_headers(&upstream.headers, BUFFERED_STRIPPED_HEADERS),
        Body::from(upstream.body),
    );

    state.logger.spawn_persist(InteractionRecord::completed(
        &start,
        request,
        response_snapshot,
        true,
    ));

    response
}

async fn relay_streaming(
    state: &AppState,
    start: InteractionStart,
    request: RequestSnapshot,
    outbound: OutboundRequest,
) -> Response {
    let upstream = match dispatch_streaming(&state.client, outbound).await {
        UpstreamOutcome::Success(upstream) => upstream,
        UpstreamOutcome::Failure(e) => return fail(state, &start, request, e),
    };

    let status = upstream.status;
    let upstream_headers = upstream.headers;
    let relayed_headers = relay_headers(&upstream_headers, STREAMING_STRIPPED_HEADERS);

    let TeeResult {
        client_stream,
        buffer_handle,
    } = StreamingProxy::tee_stream(
        upstream
            .body
            .bytes_stream()
            .map_err(reqwest::Error::without_url),
    );

    // The record is written once the client has been sent the last chunk
    // (or the stream has been dropped), never while bytes are still in flight.
    let logger = state.logger.clone();
    tokio::spawn(
        async move {
            let buffered = buffer_handle.finished().await;
            let bytes = buffered.body.len();

            let record = match buffered.end {
                StreamEnd::Completed => {
                    debug!("Stream completed after {bytes} bytes");
                    InteractionRecord::completed(
                        &start,
                        request,
                        ResponseSnapshot {
                            status: status.as_u16(),
                            headers: snapshot_headers(&upstream_headers),
                            body: LoggedBody::lossy(&buffered.body),
                        },
                        false,
                    )
                }
                StreamEnd::Failed(reason) => {
                    let e = ProxyError::Stream { reason, bytes };
                    error!(error_type = e.category(), error_message = %e, "Upstream stream failed");
                    InteractionRecord::failed(&start, request, e.interaction_error())
                }
                StreamEnd::Abandoned => {
                    let e = ProxyError::Disconnected { bytes };
                    warn!(error_type = e.category(), error_message = %e, "Client left mid-stream");
                    InteractionRecord::failed(&start, request, e.interaction_error())
                }
            };

            logger.persist(record).await;
        }
        .in_current_span(),
    );

    build_response(status, relayed_headers, Body::from_stream(client_stream))
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Log the failure, hand an error record to the logger and answer 500
fn fail(
    state: &AppState,
    start: &InteractionStart,
    request: RequestSnapshot,
    error: ProxyError,
) -> Response {
    error!(
        error_type = error.category(),
        error_message = %error,
        "Request failed"
    );

    state
        .logger
        .spawn_persist(InteractionRecord::failed(start, request, error.interaction_error()));

    error.into_response()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use axum::http::{HeaderValue, Method};
    use tower::ServiceExt;

    fn create_test_state(store: Arc<MemoryStore>) -> Arc<AppState> {
        let config = ProxyConfig {
            upstream_url: "http://127.0.0.1:1".to_string(),
            ..ProxyConfig::default()
        };
        Arc::new(AppState::new(config, InteractionLogger::new(store)).unwrap())
    }

    #[tokio::test]
    async fn test_root_returns_liveness_payload() {
        let store = Arc::new(MemoryStore::new());
        let app = create_router(create_test_state(store.clone()));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(json["message"], LIVENESS_MESSAGE);
        assert_eq!(store.len().await, 0);
    }

    #[test]
    fn test_capture_request_parses_json() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let (snapshot, error) = capture_request(
            &Method::POST,
            "/v1/foo",
            &headers,
            &Bytes::from_static(br#"{"contents": []}"#),
        );

        assert!(error.is_none());
        assert_eq!(snapshot.method, "POST");
        assert_eq!(snapshot.path, "/v1/foo");
        assert_eq!(snapshot.body, LoggedBody::Json(serde_json::json!({"contents": []})));
        assert_eq!(snapshot.headers["content-type"], "application/json");
    }

    #[test]
    fn test_capture_request_reports_lying_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let (snapshot, error) =
            capture_request(&Method::POST, "/v1/foo", &headers, &Bytes::from_static(b"oops"));

        assert!(matches!(error, Some(ProxyError::Decode(_))));
        assert_eq!(snapshot.body, LoggedBody::Text("oops".to_string()));
    }

    #[test]
    fn test_build_response_sets_status_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-upstream", HeaderValue::from_static("yes"));

        let response = build_response(StatusCode::CREATED, headers, Body::empty());

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
    }
}

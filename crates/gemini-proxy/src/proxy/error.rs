//! Request-path errors for the forwarding gateway
//!
//! Every variant ends the request with a 500 and exactly one error record.
//! Variants are split into upstream-dispatch failures and unexpected
//! failures, which only changes the wording of the record and the detail
//! returned to the caller.

use axum::{
    Json,
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use thiserror::Error;

use crate::interaction::InteractionError;

/// Errors that can occur while forwarding one request
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// Inbound request could not be read or turned into an upstream request
    #[error("Request error: {0}")]
    Request(String),

    /// Network-level error (connection, timeout, etc.)
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered with a non-success status
    #[error("Upstream error: {status}")]
    Upstream { status: StatusCode, body: String },

    /// A body declared as JSON could not be parsed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Upstream stream broke after relaying had started
    #[error("Stream error: {reason} after {bytes} bytes")]
    Stream { reason: String, bytes: usize },

    /// Client went away before the stream finished
    #[error("Client disconnected after {bytes} bytes")]
    Disconnected { bytes: usize },
}

impl ProxyError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::Request(_) => "request",
            ProxyError::Network(_) => "network",
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::Decode(_) => "decode",
            ProxyError::Stream { .. } => "stream",
            ProxyError::Disconnected { .. } => "client",
        }
    }

    /// True for failures talking to the upstream API
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            ProxyError::Network(_) | ProxyError::Upstream { .. } | ProxyError::Stream { .. }
        )
    }

    /// Message and details stored on the error record
    pub fn interaction_error(&self) -> InteractionError {
        let message = if self.is_upstream_failure() {
            format!("HTTP request failed: {} - {}", self.category(), self)
        } else {
            format!("An unexpected error occurred: {self}")
        };

        let details = match self {
            ProxyError::Upstream { body, .. } if !body.is_empty() => format!("{self}: {body}"),
            _ => self.to_string(),
        };

        InteractionError { message, details }
    }

    /// Detail string returned to the caller
    pub fn client_detail(&self) -> String {
        if self.is_upstream_failure() {
            format!("Proxy error: {self}")
        } else {
            format!("An unexpected proxy error occurred: {self}")
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let body = serde_json::json!({ "detail": self.client_detail() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_proxy_error_display() {
        let err = ProxyError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");

        let err = ProxyError::Upstream {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "upstream down".to_string(),
        };
        assert_eq!(err.to_string(), "Upstream error: 503 Service Unavailable");

        let err = ProxyError::Disconnected { bytes: 12 };
        assert_eq!(err.to_string(), "Client disconnected after 12 bytes");
    }

    #[test]
    fn test_upstream_classification() {
        assert!(ProxyError::Network(String::new()).is_upstream_failure());
        assert!(
            ProxyError::Stream {
                reason: "reset".to_string(),
                bytes: 0
            }
            .is_upstream_failure()
        );
        assert!(!ProxyError::Decode(String::new()).is_upstream_failure());
        assert!(!ProxyError::Request(String::new()).is_upstream_failure());
        assert!(!ProxyError::Disconnected { bytes: 0 }.is_upstream_failure());
    }

    #[test]
    fn test_interaction_error_for_upstream_status() {
        let err = ProxyError::Upstream {
            status: StatusCode::BAD_REQUEST,
            body: r#"{"error":"bad"}"#.to_string(),
        };

        let recorded = err.interaction_error();
        assert_eq!(
            recorded.message,
            "HTTP request failed: upstream - Upstream error: 400 Bad Request"
        );
        assert!(recorded.details.contains(r#"{"error":"bad"}"#));
    }

    #[test]
    fn test_interaction_error_for_unexpected_failure() {
        let err = ProxyError::Decode("expected value".to_string());
        let recorded = err.interaction_error();

        assert!(recorded.message.starts_with("An unexpected error occurred"));
        assert_eq!(recorded.details, "Decode error: expected value");
    }

    #[tokio::test]
    async fn test_into_response_is_500_with_detail() {
        let response = ProxyError::Network("timed out".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "Proxy error: Network error: timed out");
    }

    #[tokio::test]
    async fn test_unexpected_error_detail() {
        let response = ProxyError::Decode("bad json".to_string()).into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(
            json["detail"],
            "An unexpected proxy error occurred: Decode error: bad json"
        );
    }
}

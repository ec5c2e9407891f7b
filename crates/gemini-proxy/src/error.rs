//! Error types for the Gemini proxy

use thiserror::Error;

/// Main error type for startup, configuration and storage operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Interaction store errors (MongoDB, JSONL file, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Proxy/HTTP server errors
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{GatewayError, Result};

/// Environment variable carrying the Gemini API key
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Environment variable carrying the interaction store URI
pub const STORE_URI_ENV: &str = "MONGO_URI";

/// Main configuration structure for the proxy
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Interaction store configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP proxy server configuration
#[derive(Clone, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on (e.g., "127.0.0.1:8000")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base URL of the upstream Gemini API
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Timeout for buffered (non-streaming) upstream calls, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout for establishing upstream connections, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// API key appended as `key=` to every forwarded request
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_url: default_upstream_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            api_key: None,
        }
    }
}

// Hand-written so the key never shows up in `Config loaded: {:?}` output.
impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("listen_addr", &self.listen_addr)
            .field("upstream_url", &self.upstream_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_upstream_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    30
}

/// Interaction store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Store URI: `mongodb://...`, `mongodb+srv://...`, `file://...` or a plain path
    #[serde(default = "default_store_uri")]
    pub uri: String,
    /// Database name (MongoDB only)
    #[serde(default = "default_database")]
    pub database: String,
    /// Collection that receives one document per interaction
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uri: default_store_uri(),
            database: default_database(),
            collection: default_collection(),
        }
    }
}

fn default_store_uri() -> String {
    "mongodb://localhost:27017/".to_string()
}

fn default_database() -> String {
    "gemini_proxy_db".to_string()
}

fn default_collection() -> String {
    "gemini_interactions".to_string()
}

impl Config {
    /// Parse a configuration from TOML text
    ///
    /// A blank `api_key` is treated as no key at all.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))?;
        config.proxy.api_key = config.proxy.api_key.filter(|key| !key.trim().is_empty());
        Ok(config)
    }

    /// Read and parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Load configuration from an explicit path, or the first default location that exists
    ///
    /// Falls back to built-in defaults when no file is found. Environment
    /// overrides are applied afterwards by the caller via [`Config::apply_env`].
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(&path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".gemini-proxy").join("config.toml")),
            dirs::config_dir().map(|c| c.join("gemini-proxy").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Apply `GEMINI_API_KEY` and `MONGO_URI` overrides read through `lookup`
    ///
    /// Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(API_KEY_ENV) {
            self.proxy.api_key = Some(key);
        }
        if let Some(uri) = non_empty(STORE_URI_ENV) {
            self.storage.uri = uri;
        }
    }
}

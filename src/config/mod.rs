//! Client configuration.
//!
//! The client never reads process state itself: the hosting process builds a
//! [`ClientConfig`] and hands it to [`crate::Client::new`]. Two loaders are
//! provided for that process:
//! - TOML config files ([`ClientConfig::from_file`])
//! - Environment variables set by the coordinator ([`ClientConfig::from_env`])

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{ChatPlugError, Result};

/// Environment variable holding the GraphQL HTTP endpoint
pub const ENV_HTTP_ENDPOINT: &str = "HTTP_ENDPOINT";
/// Environment variable holding the GraphQL WebSocket endpoint
pub const ENV_WS_ENDPOINT: &str = "WS_ENDPOINT";
/// Environment variable holding the access credential
pub const ENV_ACCESS_TOKEN: &str = "ACCESS_TOKEN";
/// Environment variable holding the instance identifier
pub const ENV_INSTANCE_ID: &str = "INSTANCE_ID";
/// Optional override for the configuration cache directory
pub const ENV_CACHE_DIR: &str = "CHATPLUG_CACHE_DIR";

/// Main configuration struct
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// GraphQL endpoint for request/response calls (http/https)
    pub http_endpoint: String,

    /// GraphQL endpoint for subscriptions (ws/wss)
    pub ws_endpoint: String,

    /// Access credential issued by the coordinator
    pub access_token: String,

    /// Identifier of this plugin instance
    pub instance_id: String,

    /// Directory holding the negotiated configuration cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Give up on configuration negotiation after this many milliseconds
    #[serde(default)]
    pub negotiation_timeout_ms: Option<u64>,

    /// Transport tuning
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".")
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("http_endpoint", &self.http_endpoint)
            .field("ws_endpoint", &self.ws_endpoint)
            .field("access_token", &crate::protocol::REDACTED)
            .field("instance_id", &self.instance_id)
            .field("cache_dir", &self.cache_dir)
            .field("negotiation_timeout_ms", &self.negotiation_timeout_ms)
            .field("transport", &self.transport)
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration with default tuning
    pub fn new(
        http_endpoint: impl Into<String>,
        ws_endpoint: impl Into<String>,
        access_token: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            http_endpoint: http_endpoint.into(),
            ws_endpoint: ws_endpoint.into(),
            access_token: access_token.into(),
            instance_id: instance_id.into(),
            cache_dir: default_cache_dir(),
            negotiation_timeout_ms: None,
            transport: TransportConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChatPlugError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from the variables the coordinator sets when it
    /// spawns a plugin instance
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut missing = Vec::new();
        let mut require = |key: &'static str| {
            let value = lookup(key).filter(|v| !v.trim().is_empty());
            if value.is_none() {
                missing.push(key);
            }
            value.unwrap_or_default()
        };

        let http_endpoint = require(ENV_HTTP_ENDPOINT);
        let ws_endpoint = require(ENV_WS_ENDPOINT);
        let access_token = require(ENV_ACCESS_TOKEN);
        let instance_id = require(ENV_INSTANCE_ID);

        if !missing.is_empty() {
            return Err(ChatPlugError::Startup(format!(
                "missing required variables: {}",
                missing.join(", ")
            )));
        }

        let mut config = Self::new(http_endpoint, ws_endpoint, access_token, instance_id);
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            config.cache_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Set the negotiation timeout (millisecond resolution)
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.negotiation_timeout_ms = Some(millis);
        self
    }

    /// Check that the client can start with this configuration
    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(ChatPlugError::Startup("access token is empty".to_string()));
        }
        if self.instance_id.trim().is_empty() {
            return Err(ChatPlugError::Startup("instance id is empty".to_string()));
        }
        if self.instance_id.contains(['/', '\\']) || self.instance_id.contains("..") {
            return Err(ChatPlugError::Startup(format!(
                "instance id {:?} is not usable as a file name",
                self.instance_id
            )));
        }
        check_endpoint("HTTP endpoint", &self.http_endpoint, &["http", "https"])?;
        check_endpoint("WebSocket endpoint", &self.ws_endpoint, &["ws", "wss"])?;
        Ok(())
    }

    /// Negotiation timeout, if any
    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_ms.map(Duration::from_millis)
    }
}

fn check_endpoint(label: &str, endpoint: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(endpoint)
        .map_err(|e| ChatPlugError::Startup(format!("{label} {endpoint:?} is invalid: {e}")))?;
    if !schemes.contains(&url.scheme()) {
        return Err(ChatPlugError::Startup(format!(
            "{label} {endpoint:?} must use one of: {}",
            schemes.join(", ")
        )));
    }
    Ok(())
}

/// Transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Request/response timeout in seconds
    pub request_timeout_secs: u64,

    /// How long to wait for `connection_ack` after opening the socket
    pub ack_timeout_secs: u64,

    /// Event channel reconnection policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            ack_timeout_secs: 10,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Handshake timeout
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

/// Event channel reconnection policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect after the socket drops (false = streams end with the socket)
    pub enabled: bool,

    /// Base backoff delay in milliseconds
    pub base_ms: u64,

    /// Backoff cap in milliseconds
    pub max_ms: u64,

    /// Consecutive failed attempts before giving up (None = never)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_ms: 1000,
            max_ms: 60_000,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Policy that never reconnects
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

//! ChatPlug client error types.
//!
//! # Error Classification
//!
//! - **Startup**: the hosting process did not supply a usable identity,
//!   credential or endpoint. Nothing has touched the network yet.
//! - **Transport**: a request/response call or the event socket failed.
//!   Surfaced to the caller, never retried by the client itself.
//! - **StreamClosed**: an event stream ended and will deliver nothing more.
//! - **Resolver**: a caller-supplied search resolver failed. Caught per
//!   request by the search listener.
//! - **Decode**: an inbound payload did not match the typed data model.

use thiserror::Error;

/// ChatPlug client errors.
#[derive(Error, Debug)]
pub enum ChatPlugError {
    /// Required identity, credential or endpoint is missing or malformed.
    #[error("Startup error: {0}")]
    Startup(String),

    /// Request/response or socket failure (network, auth, server errors).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Event stream ended before delivering what was expected.
    #[error("Stream closed: {0}")]
    StreamClosed(String),

    /// Search resolver failed for one query.
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// Inbound payload did not decode into the expected type.
    #[error("Decode error in {operation}: {message}")]
    Decode {
        /// Operation whose payload failed to decode.
        operation: &'static str,
        /// Underlying decoder message.
        message: String,
    },

    /// Protocol-level violation (invalid lifecycle transition, malformed frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration file error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ChatPlug operations
pub type Result<T> = std::result::Result<T, ChatPlugError>;

impl ChatPlugError {
    /// Build a [`ChatPlugError::Decode`] from a serde error.
    pub fn decode(operation: &'static str, err: &serde_json::Error) -> Self {
        ChatPlugError::Decode {
            operation,
            message: err.to_string(),
        }
    }

    /// Whether this error came from the network layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, ChatPlugError::Transport(_))
    }
}

impl From<reqwest::Error> for ChatPlugError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatPlugError::Timeout(err.to_string())
        } else {
            ChatPlugError::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatPlugError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatPlugError::Transport(format!("WebSocket: {err}"))
    }
}

impl From<toml::de::Error> for ChatPlugError {
    fn from(err: toml::de::Error) -> Self {
        ChatPlugError::Config(format!("Failed to parse config: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatPlugError::Startup("ACCESS_TOKEN is not set".into());
        assert_eq!(err.to_string(), "Startup error: ACCESS_TOKEN is not set");

        let err = ChatPlugError::Decode {
            operation: "messageReceived",
            message: "missing field `body`".into(),
        };
        assert!(err.to_string().contains("messageReceived"));
        assert!(err.to_string().contains("body"));
    }

    #[test]
    fn test_decode_from_serde() {
        let serde_err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err = ChatPlugError::decode("sendMessage", &serde_err);
        assert!(matches!(
            err,
            ChatPlugError::Decode {
                operation: "sendMessage",
                ..
            }
        ));
    }

    #[test]
    fn test_is_transport() {
        assert!(ChatPlugError::Transport("refused".into()).is_transport());
        assert!(!ChatPlugError::Protocol("bad state".into()).is_transport());
    }
}

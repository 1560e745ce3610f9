use std::path::PathBuf;

use shared::domain::UserId;
use thiserror::Error;

/// Failures reported by the transport. They are delivered as events and never
/// returned across the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The broker was never reached, or it rejected the handshake.
    #[error("failed to connect to broker at {endpoint}: {reason}")]
    ConnectFailure { endpoint: String, reason: String },
    /// Malformed frame or a broker ERROR frame on an established connection.
    #[error("broker protocol error: {0}")]
    Protocol(String),
    /// The socket dropped or went silent.
    #[error("connection lost: {0}")]
    TransientNetwork(String),
}

impl TransportError {
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::ConnectFailure { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api url must start with http://, https://, ws:// or wss://: {0}")]
    UnsupportedScheme(String),
    #[error("invalid websocket endpoint {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to read settings file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Errors returned by the collaborator surface of [`crate::ChatSession`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("user id must not be empty")]
    EmptyUserId,
    #[error("already logged in as {0}; leave the room first")]
    AlreadyLoggedIn(UserId),
    #[error("chat session has shut down")]
    SessionClosed,
}

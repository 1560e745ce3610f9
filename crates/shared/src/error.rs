use thiserror::Error;

/// Failure to decode a STOMP frame off the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
    #[error("frame is not NUL-terminated")]
    Unterminated,
}

/// Failure to decode a JSON payload carried in a MESSAGE frame body.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid {kind} payload: {source}")]
    Json {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("direct message is missing a sender or receiver")]
    MissingParticipant,
}

impl PayloadError {
    pub fn json(kind: &'static str, source: serde_json::Error) -> Self {
        Self::Json { kind, source }
    }
}

//! LLM client error types.

use thiserror::Error;

/// Result type for streaming session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Address resolution or connection establishment failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Discovery needs the HTTP base URL.
    #[error("base URL is required for gRPC address discovery")]
    MissingBaseUrl,

    /// Base URL could not be parsed or has no host.
    #[error("invalid base URL {url}: {message}")]
    InvalidBaseUrl { url: String, message: String },

    /// Config lookup request failed.
    #[error("failed to fetch LLM config: {0}")]
    LookupFailed(#[from] reqwest::Error),

    /// Config endpoint answered with a non-200 status.
    #[error("config request failed with status {status}: {body}")]
    LookupStatus { status: u16, body: String },

    /// Config response was not the expected JSON.
    #[error("failed to decode config response: {0}")]
    ParseError(String),

    /// The account has no LLM access.
    #[error("LLM service is not available for this organization")]
    Unavailable,

    /// gRPC channel could not be established.
    #[error("failed to connect to LLM server at {address}: {message}")]
    ConnectionFailed { address: String, message: String },
}

/// One-shot chat call failed.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("chat request failed: {0}")]
    Rpc(#[from] tonic::Status),
}

/// Streaming chat session failure.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The bidirectional stream could not be opened.
    #[error("failed to start chat session: {0}")]
    Open(tonic::Status),

    /// The backend stopped accepting commands.
    #[error("failed to send {0}: stream is closed")]
    Send(&'static str),

    /// Transport error while receiving.
    #[error("stream receive error: {0}")]
    Stream(tonic::Status),

    /// The backend reported an error event.
    #[error("LLM error: {message} (code: {code})")]
    Backend {
        code: String,
        message: String,
        retryable: bool,
    },

    /// The backend aborted the generation.
    #[error("generation aborted: {reason}")]
    Aborted { reason: String },

    /// The chunk callback returned an error.
    #[error("chunk callback failed: {0}")]
    Callback(anyhow::Error),

    #[error("session is closed")]
    Closed,

    #[error("at least one message is required")]
    EmptyConversation,

    #[error("last message must be from user")]
    LastMessageNotUser,
}

impl SessionError {
    /// True for operations attempted after [`close`](super::ChatSession::close).
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionError::Closed)
    }

    /// Whether repeating the operation may succeed. Only the backend's own hint
    /// and connection-level failures qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Backend { retryable, .. } => *retryable,
            SessionError::Connect(_) | SessionError::Open(_) => true,
            _ => false,
        }
    }
}

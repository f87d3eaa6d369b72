use std::time::Duration;

use thiserror::Error;

/// Errors raised by the chat pipeline.
///
/// Absence of a session is deliberately not represented here: persistence and
/// hydration treat it as an `Ok(None)` outcome.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message text must not be empty")]
    EmptyInput,

    #[error("a response is still streaming for chat {0}")]
    TurnInProgress(String),

    #[error("model endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("model endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model response timed out after {0:?}")]
    Timeout(Duration),

    #[error("model endpoint reported an error: {0}")]
    Model(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("chat storage failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("chat serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChatError {
    /// Whether retrying the same request may succeed.
    ///
    /// Only connection-level failures, rate limiting and server errors qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            ChatError::Endpoint { status, .. } => *status == 429 || *status >= 500,
            ChatError::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

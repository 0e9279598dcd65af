//! Error taxonomy of the live coordinator.
//!
//! Nothing here is fatal to the caller: transport errors degrade to "no live
//! updates", pull/write failures leave the cache as it was, and a missing
//! credential short-circuits before any network call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("no credential available")]
    MissingCredential,

    #[error("invalid access token: {0}")]
    InvalidToken(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned status {status}")]
    Status { status: u16, endpoint: String },

    #[error("invalid json payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("stomp protocol error: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("push channel closed")]
    Closed,
}

impl LiveError {
    /// Transport-level failures are recovered by reconnecting; everything else
    /// is reported once and left alone.
    pub fn is_transport(&self) -> bool {
        matches!(self, LiveError::Transport(_) | LiveError::Protocol(_) | LiveError::Closed)
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;

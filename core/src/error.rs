use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PilotErr>;

#[derive(Debug, Error)]
pub enum PilotErr {
    /// Transport-level failure while the stream was live. Terminates the
    /// current session; whatever partial content was reduced stays in the
    /// store.
    #[error("stream disconnected: {0}")]
    Stream(String),

    /// The backend answered with a non-2xx status before streaming began.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    /// No bytes arrived within the configured idle window.
    #[error("timeout waiting for stream")]
    Timeout,

    /// The user cancelled the turn. Distinct from `Stream` so the UI can
    /// tell a stop from a network failure; both end the turn.
    #[error("stream interrupted by user")]
    Interrupted,

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

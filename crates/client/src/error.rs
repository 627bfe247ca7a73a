//! Client error types.

use thiserror::Error;

/// Errors surfaced by the friends client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server rejected the request.
    #[error("{message}")]
    Api {
        /// Machine-readable code, e.g. `CONFLICT`.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A mutation on the same relationship has not settled yet.
    #[error("Another change to {0} is still in progress")]
    InFlight(String),
}

impl ClientError {
    /// Error code for display and matching; transport-level failures have none
    /// from the server so get a local one.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Api { code, .. } => code,
            Self::Decode(_) => "DECODE_ERROR",
            Self::InFlight(_) => "IN_FLIGHT",
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

//! Errors of the queue/storage API client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure (DNS, refused connection, broken stream).
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a status >= 400.
    #[error("API error (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server answered 2xx with an envelope we cannot use.
    #[error("unexpected API response: {0}")]
    Decode(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid job id")]
    InvalidJobId,
}

impl ApiError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ApiError::Io {
            context: context.into(),
            source,
        }
    }
}

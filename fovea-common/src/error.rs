//! Common error types for Fovea

use thiserror::Error;

/// Common result type for Fovea operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the Fovea client
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server-side GraphQL error returned in a response `errors` array
    #[error("GraphQL error: {0}")]
    Graphql(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A setter was invoked against state it cannot apply to
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Event stream failure (bad status, malformed frame, broken pipe)
    #[error("Transport error: {0}")]
    Transport(String),
}

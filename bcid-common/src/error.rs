//! Common error types for the identification pipeline

use thiserror::Error;

/// Common result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across pipeline stages
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error for query artifacts
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A single external request failed (may be retried)
    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    /// Retry budget exhausted against an external service
    ///
    /// Terminal: the service is persistently unavailable. Every per-target
    /// result is keyed and written independently, so rerunning the stage
    /// later is safe.
    #[error(
        "Failed to fetch data from {endpoint} after {attempts} attempts. \
         Please try resuming this job at a later time. Last error: {last}"
    )]
    ApiExhausted {
        endpoint: String,
        attempts: u32,
        last: RequestError,
    },

    /// Broken internal invariant (a logic bug, never a normal API failure)
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors that must abort a whole concurrent batch instead of being
    /// recorded against a single target.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ApiExhausted { .. } | Error::Invariant(_))
    }

    /// Lookup misses are expected outcomes (taxon or accession unknown).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::Request(RequestError::NotFound(_))
        )
    }
}

/// Classification of one failed call to an external service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    /// HTTP 429 or an equivalent throttling response
    #[error("rate limited by remote service (HTTP 429)")]
    RateLimited,

    /// Non-success HTTP status other than 404/429
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, DNS or timeout failure
    #[error("network error: {0}")]
    Network(String),

    /// The service has no record for the request
    #[error("no record: {0}")]
    NotFound(String),

    /// Response body could not be decoded
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RequestError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RequestError::RateLimited)
    }

    /// Build from an HTTP status code and (possibly empty) response body.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            429 => RequestError::RateLimited,
            404 => RequestError::NotFound(body.into()),
            _ => RequestError::Status {
                status,
                body: body.into(),
            },
        }
    }
}

//! Compute backend error types.

use thiserror::Error;

/// Errors surfaced by a [`ComputeBackend`](crate::ComputeBackend)
/// implementation. No retry policy lives at this layer; transient
/// transport failures are passed through to the caller unmodified.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned {status}: {body}")]
    Http { status: u16, body: String },

    /// The optimistic-concurrency fingerprint sent with a replacement
    /// write no longer matches the resource's current version.
    #[error("fingerprint precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("failed to decode backend response: {0}")]
    Decode(String),
}

pub type ComputeResult<T> = Result<T, ComputeError>;

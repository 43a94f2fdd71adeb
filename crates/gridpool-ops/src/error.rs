//! Operation-layer error types.

use gridpool_compute::types::CorrelationId;
use gridpool_compute::{ComputeError, Operation};
use thiserror::Error;

/// Errors raised while driving backend operations.
#[derive(Debug, Error)]
pub enum OpsError {
    /// The operation did not reach DONE before the caller's deadline.
    /// Carries the last polled state for diagnostics. A timeout means
    /// "outcome unknown", not "operation did not happen" — the backend
    /// keeps running it.
    #[error("timed out waiting for operation {name} in {zone} (last status {status:?})",
        name = .last.name, zone = .last.zone, status = .last.status)]
    PollTimeout { last: Operation },

    /// A backend call failed; annotated with the request's correlation id
    /// so cross-system logs can be joined.
    #[error("[{correlation}] {source}")]
    Backend {
        correlation: CorrelationId,
        source: ComputeError,
    },
}

impl OpsError {
    /// Whether this is the optimistic-concurrency precondition failure
    /// (another writer won the race for the resource's version token).
    pub fn is_precondition_failure(&self) -> bool {
        matches!(
            self,
            Self::Backend {
                source: ComputeError::PreconditionFailed(_),
                ..
            }
        )
    }
}

pub type OpsResult<T> = Result<T, OpsError>;

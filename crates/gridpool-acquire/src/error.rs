//! Acquisition error taxonomy.
//!
//! Four in-process classes:
//! - [`GiveUpReason`] — "no usable resource via this strategy"; the
//!   orchestrator catches these and tries the next strategy. Logged at
//!   info/warn, never as errors.
//! - Hard failures — generation/start/delete failed, image or instance
//!   missing; propagated with the terminal operation attached.
//! - [`InvariantViolation`] — a correctness assumption broke (occupied
//!   mid-start, deletion racing in, not running after a successful
//!   start). Distinct from give-ups: these do not trigger fallback.
//! - Timeouts and transport errors bubble up from the operation layer,
//!   already annotated with the correlation id.

use gridpool_compute::{InstanceStatus, Operation};
use gridpool_ops::OpsError;
use gridpool_provision::ProvisionError;
use thiserror::Error;

/// Why a strategy found nothing usable. Not an error: the next strategy
/// gets its turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GiveUpReason {
    #[error("no stopped grid matches the profile")]
    NoStoppedGrid,

    #[error("no running grid matches the profile")]
    NoRunningGrid,

    #[error("lost the lock race for grid {0}")]
    LockContended(String),

    #[error("gave up after {attempts} contended acquisition attempts")]
    ContentionExhausted { attempts: u32 },
}

/// A correctness assumption broke during acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("grid {grid} is occupied by {holder} after our start")]
    OccupiedByOther { grid: String, holder: String },

    #[error("grid {grid} is flagged for deletion")]
    BeingDeleted { grid: String },

    #[error("grid {grid} is {status:?} after a successful start operation")]
    NotRunningAfterStart {
        grid: String,
        status: InstanceStatus,
    },
}

/// Hard failures of the acquisition and release protocols.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// No source image resolves for the request. A configuration
    /// problem, not contention — never a give-up.
    #[error("no source image found for {0}")]
    ImageNotFound(String),

    #[error("grid {0} not found")]
    InstanceNotFound(String),

    #[error("grid deletion failed (operation {name})", name = .operation.name)]
    DeleteFailed { operation: Operation },

    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Ops(#[from] OpsError),
}

pub type AcquireResult<T> = Result<T, AcquireError>;

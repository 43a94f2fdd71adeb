//! Provisioning error types.
//!
//! These are hard failures in the acquisition taxonomy: they are never
//! caught to try another strategy, and each carries the terminal
//! operation (or observed state) for diagnostics.

use gridpool_compute::{InstanceStatus, Operation};
use gridpool_ops::OpsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Instance creation ended with a failed operation, in the original
    /// zone and every re-attempted one.
    #[error("grid generation failed (operation {name} in {zone})",
        name = .operation.name, zone = .operation.zone)]
    GenerationFailed { operation: Operation },

    /// The starter was handed an instance that is not stopped. Caller
    /// bug: the stopped-grid strategy only locks TERMINATED instances.
    #[error("cannot start grid {name}: status is {status:?}, expected TERMINATED")]
    NotStopped {
        name: String,
        status: InstanceStatus,
    },

    /// One of the pre-start reconciliation writes (machine type, service
    /// account, labels, metadata) completed as a failed operation.
    #[error("pre-start reconciliation failed (operation {name}, type {op_type})",
        name = .operation.name, op_type = .operation.operation_type)]
    ReconcileFailed { operation: Operation },

    /// The start-instance operation completed as a failure.
    #[error("grid start failed (operation {name})", name = .operation.name)]
    StartFailed { operation: Operation },

    #[error(transparent)]
    Ops(#[from] OpsError),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

//! GridPool compute backend — domain types and the cloud client seam.

pub mod backend;
pub mod error;
pub mod rand;
pub mod rest;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::ComputeBackend;
pub use error::{ComputeError, ComputeResult};
pub use crate::rand::RandomSource;
pub use rest::RestCompute;
pub use types::{
    CapabilityProfile, CorrelationId, DesiredGridConfig, Image, Instance, InstanceStatus,
    InstanceTemplate, Labels, Metadata, Operation, OperationStatus,
};

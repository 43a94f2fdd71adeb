//! GridPool operation layer — drives the backend's asynchronous
//! long-running operations and versioned label/metadata writes.

pub mod driver;
pub mod error;
pub mod updater;

pub use driver::{MAX_ZONAL_REATTEMPTS, OperationDriver, ZonalRetryPolicy};
pub use error::{OpsError, OpsResult};
pub use updater::{FingerprintUpdater, STALE_FINGERPRINT};

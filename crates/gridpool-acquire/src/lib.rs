//! GridPool acquisition — turns a capability profile into a ready,
//! exclusively-owned grid, and hands grids back when builds finish.

pub mod context;
pub mod error;
pub mod pool;
pub mod release;
pub mod reservation;
pub mod strategy;

pub use context::{AcquireCtx, AcquireSettings, GridRequest, LockAttempt};
pub use error::{AcquireError, AcquireResult, GiveUpReason, InvariantViolation};
pub use pool::GridPool;
pub use release::{ReleaseOutcome, ReleaseRequest, release_grid};
pub use reservation::{InMemoryReservations, ReservationLedger};
pub use strategy::{Acquisition, acquire_grid, generate_new, reuse_running, start_stopped};

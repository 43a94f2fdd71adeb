//! Acquisition context — everything a strategy needs, passed by value.
//!
//! Strategies are free functions over one context value instead of a
//! handler class hierarchy; the shared helpers (lock writes, annotated
//! backend calls, verification fetches) live here.

use std::sync::Arc;
use std::time::Duration;

use gridpool_compute::types::{CorrelationId, keys};
use gridpool_compute::{
    CapabilityProfile, ComputeBackend, ComputeError, DesiredGridConfig, Instance, Labels, Operation,
};
use gridpool_ops::{FingerprintUpdater, OperationDriver, OpsError};
use gridpool_provision::{GridGenerator, GridStarter};
use gridpool_search::GridSearcher;

use crate::error::{AcquireError, AcquireResult};
use crate::reservation::ReservationLedger;

/// Acquisition tuning knobs.
#[derive(Debug, Clone)]
pub struct AcquireSettings {
    /// Bounded search → reserve → lock attempts in the reuse strategy.
    pub reuse_attempts: u32,
    /// Poll cadence for operation waits issued by the strategies.
    pub poll_interval: Duration,
    /// Deadline for lock/flag label writes.
    pub lock_timeout: Duration,
    /// Deadline for instance deletion.
    pub delete_timeout: Duration,
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self {
            reuse_attempts: 5,
            poll_interval: Duration::from_secs(2),
            lock_timeout: Duration::from_secs(60),
            delete_timeout: Duration::from_secs(300),
        }
    }
}

/// One grid-acquisition request, as received from the API surface.
#[derive(Debug, Clone)]
pub struct GridRequest {
    pub zone: String,
    pub profile: CapabilityProfile,
    pub desired: DesiredGridConfig,
    /// Skip the reuse/start-stopped searches, go straight to generation.
    pub no_rush: bool,
    /// Force a specific source image family instead of searching one.
    pub source_image_family: Option<String>,
}

/// Everything a strategy needs for one request.
#[derive(Clone)]
pub struct AcquireCtx {
    pub backend: Arc<dyn ComputeBackend>,
    pub driver: OperationDriver,
    pub updater: FingerprintUpdater,
    pub searcher: GridSearcher,
    pub generator: GridGenerator,
    pub starter: GridStarter,
    pub reservations: Arc<dyn ReservationLedger>,
    pub settings: Arc<AcquireSettings>,
}

/// Outcome of a remote lock write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Locked,
    /// Another writer won the version token (or the write operation
    /// itself reported failure); ordinary contention.
    Contended,
}

impl AcquireCtx {
    pub fn correlation(&self) -> &CorrelationId {
        self.driver.correlation()
    }

    /// Annotate a raw backend error with this request's correlation id.
    pub fn annotate(&self, source: ComputeError) -> AcquireError {
        AcquireError::Ops(OpsError::Backend {
            correlation: self.correlation().clone(),
            source,
        })
    }

    /// Write this caller's correlation id into the instance's lock label
    /// and wait for the write to land. A lost fingerprint race or a
    /// failed write operation reports [`LockAttempt::Contended`].
    pub async fn try_lock(&self, instance: &mut Instance) -> AcquireResult<LockAttempt> {
        let partial = Labels::from([(
            keys::LOCKED_BY.to_string(),
            self.correlation().as_str().to_string(),
        )]);
        match self.updater.update_labels(instance, &partial).await {
            Ok(op) => {
                let done = self.await_label_write(op).await?;
                Ok(if done.succeeded() {
                    LockAttempt::Locked
                } else {
                    LockAttempt::Contended
                })
            }
            Err(e) if e.is_precondition_failure() => Ok(LockAttempt::Contended),
            Err(e) => Err(e.into()),
        }
    }

    /// Block on a label/flag write with the short metadata-class bounds.
    pub async fn await_label_write(&self, op: Operation) -> AcquireResult<Operation> {
        Ok(self
            .driver
            .block_until_complete(op, self.settings.poll_interval, self.settings.lock_timeout)
            .await?)
    }

    /// Fetch an instance that must exist.
    pub async fn fetch_required(&self, zone: &str, name: &str) -> AcquireResult<Instance> {
        self.backend
            .get_instance(zone, name)
            .await
            .map_err(|e| self.annotate(e))?
            .ok_or_else(|| AcquireError::InstanceNotFound(format!("{zone}/{name}")))
    }
}

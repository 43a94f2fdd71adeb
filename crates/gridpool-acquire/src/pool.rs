//! The long-lived pool service.
//!
//! Owns the shared pieces (backend handle, reservation ledger, settings,
//! random source) and assembles a per-request [`AcquireCtx`] around each
//! caller's correlation id.

use std::sync::Arc;

use gridpool_compute::types::CorrelationId;
use gridpool_compute::{ComputeBackend, Instance, RandomSource};
use gridpool_ops::{FingerprintUpdater, OperationDriver, ZonalRetryPolicy};
use gridpool_provision::{GridGenerator, GridStarter, ProvisionSettings};
use gridpool_search::{GridSearcher, SearchSettings};

use crate::context::{AcquireCtx, AcquireSettings, GridRequest};
use crate::error::AcquireResult;
use crate::release::{ReleaseOutcome, ReleaseRequest, release_grid};
use crate::reservation::ReservationLedger;
use crate::strategy::acquire_grid;

/// Shared, request-independent state of the grid pool.
#[derive(Clone)]
pub struct GridPool {
    backend: Arc<dyn ComputeBackend>,
    reservations: Arc<dyn ReservationLedger>,
    rng: RandomSource,
    retry: ZonalRetryPolicy,
    search: SearchSettings,
    provision: Arc<ProvisionSettings>,
    acquire: Arc<AcquireSettings>,
}

impl GridPool {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        reservations: Arc<dyn ReservationLedger>,
        rng: RandomSource,
        retry: ZonalRetryPolicy,
        search: SearchSettings,
        provision: ProvisionSettings,
        acquire: AcquireSettings,
    ) -> Self {
        Self {
            backend,
            reservations,
            rng,
            retry,
            search,
            provision: Arc::new(provision),
            acquire: Arc::new(acquire),
        }
    }

    /// Assemble the per-request context for one correlation id.
    pub fn context(&self, correlation: CorrelationId) -> AcquireCtx {
        let driver = OperationDriver::new(
            Arc::clone(&self.backend),
            correlation.clone(),
            self.rng.clone(),
            self.retry.clone(),
        );
        let updater = FingerprintUpdater::new(Arc::clone(&self.backend), correlation);
        let searcher = GridSearcher::new(
            Arc::clone(&self.backend),
            self.rng.clone(),
            self.search.clone(),
        );
        let generator = GridGenerator::new(
            Arc::clone(&self.backend),
            driver.clone(),
            self.rng.clone(),
            Arc::clone(&self.provision),
        );
        let starter = GridStarter::new(
            Arc::clone(&self.backend),
            driver.clone(),
            updater.clone(),
            Arc::clone(&self.provision),
        );
        AcquireCtx {
            backend: Arc::clone(&self.backend),
            driver,
            updater,
            searcher,
            generator,
            starter,
            reservations: Arc::clone(&self.reservations),
            settings: Arc::clone(&self.acquire),
        }
    }

    /// Acquire a ready, exclusively-owned grid for the request.
    pub async fn acquire(
        &self,
        correlation: CorrelationId,
        request: &GridRequest,
    ) -> AcquireResult<Instance> {
        let ctx = self.context(correlation);
        acquire_grid(&ctx, request).await
    }

    /// Release or delete a grid per the request's flags.
    pub async fn release(
        &self,
        correlation: CorrelationId,
        request: &ReleaseRequest,
    ) -> AcquireResult<ReleaseOutcome> {
        let ctx = self.context(correlation);
        release_grid(&ctx, request).await
    }
}

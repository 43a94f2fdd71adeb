//! Operation driver — executes backend calls and drives their
//! long-running operations to a terminal state.
//!
//! Three layers, used together by the provisioning code:
//! - [`OperationDriver::execute_once`] runs a single call with
//!   correlation-annotated error visibility and no retry policy
//!   (deliberately deferred).
//! - [`OperationDriver::block_until_complete`] polls an operation on a
//!   timer until DONE or a caller-supplied deadline.
//! - [`OperationDriver::execute_with_zonal_reattempt`] re-submits a
//!   failed instance creation to randomly chosen alternate zones when the
//!   failure is a capacity-class error. This is the only place zone
//!   failover happens.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use gridpool_compute::types::CorrelationId;
use gridpool_compute::{ComputeBackend, ComputeResult, Operation, RandomSource};

use crate::error::{OpsError, OpsResult};

/// Upper bound on alternate-zone attempts, regardless of how many zones
/// are configured.
pub const MAX_ZONAL_REATTEMPTS: usize = 5;

/// Zone-failover configuration.
#[derive(Debug, Clone, Default)]
pub struct ZonalRetryPolicy {
    /// All zones creation may be attempted in.
    pub zones: Vec<String>,
    /// Operation error codes that indicate per-zone resource exhaustion
    /// and are worth re-attempting elsewhere.
    pub retryable_codes: HashSet<String>,
}

/// Per-request driver over the compute backend.
#[derive(Clone)]
pub struct OperationDriver {
    backend: Arc<dyn ComputeBackend>,
    correlation: CorrelationId,
    rng: RandomSource,
    retry: ZonalRetryPolicy,
}

impl OperationDriver {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        correlation: CorrelationId,
        rng: RandomSource,
        retry: ZonalRetryPolicy,
    ) -> Self {
        Self {
            backend,
            correlation,
            rng,
            retry,
        }
    }

    pub fn correlation(&self) -> &CorrelationId {
        &self.correlation
    }

    /// Run a single backend call. On failure, log enough context to
    /// diagnose (including the correlation id) and re-raise; no retry
    /// is attempted at this layer.
    pub async fn execute_once<T, F, Fut>(&self, what: &str, call: F) -> OpsResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ComputeResult<T>>,
    {
        match call().await {
            Ok(value) => Ok(value),
            Err(source) => {
                warn!(
                    correlation = %self.correlation,
                    call = %what,
                    error = %source,
                    "backend call failed"
                );
                Err(OpsError::Backend {
                    correlation: self.correlation.clone(),
                    source,
                })
            }
        }
    }

    /// Re-fetch `operation` every `poll_interval` until it reports DONE,
    /// or fail with [`OpsError::PollTimeout`] once `timeout` has elapsed.
    /// The timeout error carries the last observed operation state.
    pub async fn block_until_complete(
        &self,
        operation: Operation,
        poll_interval: Duration,
        timeout: Duration,
    ) -> OpsResult<Operation> {
        let started = Instant::now();
        let mut current = operation;
        loop {
            if current.is_done() {
                return Ok(current);
            }
            if started.elapsed() >= timeout {
                warn!(
                    correlation = %self.correlation,
                    operation = %current.name,
                    zone = %current.zone,
                    "gave up waiting for operation"
                );
                return Err(OpsError::PollTimeout { last: current });
            }
            tokio::time::sleep(poll_interval).await;
            let zone = current.zone.clone();
            let name = current.name.clone();
            current = self
                .execute_once("get_zone_operation", || {
                    self.backend.get_zone_operation(&zone, &name)
                })
                .await?;
        }
    }

    /// Submit an instance-creation call and drive it to completion,
    /// re-attempting in alternate zones on capacity-class failures.
    ///
    /// `submit` is the variant factory: given a zone it builds and
    /// submits a creation request identical in every other respect.
    /// The returned operation is always terminal; callers decide what a
    /// still-failed one means. The original zone is never re-tried, a
    /// non-retryable error code stops the loop immediately, and at most
    /// `min(MAX_ZONAL_REATTEMPTS, |alternates|)` re-attempts are made.
    pub async fn execute_with_zonal_reattempt<F, Fut>(
        &self,
        zone: &str,
        poll_interval: Duration,
        timeout: Duration,
        submit: F,
    ) -> OpsResult<Operation>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ComputeResult<Operation>>,
    {
        let first = self
            .execute_once("insert_instance", || submit(zone.to_string()))
            .await?;
        let mut completed = self
            .block_until_complete(first, poll_interval, timeout)
            .await?;
        if completed.succeeded() {
            return Ok(completed);
        }

        if completed.errors.is_empty() {
            warn!(
                correlation = %self.correlation,
                operation = %completed.name,
                zone,
                "creation failed without an error list; not re-attempting"
            );
            return Ok(completed);
        }
        if !self.has_retryable_code(&completed) {
            warn!(
                correlation = %self.correlation,
                operation = %completed.name,
                zone,
                codes = ?completed.error_codes().collect::<Vec<_>>(),
                "creation failed with non-retryable error codes; not re-attempting"
            );
            return Ok(completed);
        }

        let candidates: Vec<String> = self
            .retry
            .zones
            .iter()
            .filter(|z| z.as_str() != zone)
            .cloned()
            .collect();
        if candidates.len() < 2 {
            warn!(
                correlation = %self.correlation,
                zone,
                alternates = candidates.len(),
                "zonal re-attempt needs more alternate zones; returning failed operation"
            );
            return Ok(completed);
        }

        let max_attempts = MAX_ZONAL_REATTEMPTS.min(candidates.len());
        for attempt in 1..=max_attempts {
            let Some(alternate) = self.rng.pick(&candidates).cloned() else {
                break;
            };
            info!(
                correlation = %self.correlation,
                from = zone,
                to = %alternate,
                attempt,
                max_attempts,
                "re-attempting creation in alternate zone"
            );
            let op = self
                .execute_once("insert_instance", || submit(alternate.clone()))
                .await?;
            completed = self.block_until_complete(op, poll_interval, timeout).await?;
            if completed.succeeded() {
                return Ok(completed);
            }
            if !completed.errors.is_empty() && !self.has_retryable_code(&completed) {
                warn!(
                    correlation = %self.correlation,
                    operation = %completed.name,
                    zone = %alternate,
                    codes = ?completed.error_codes().collect::<Vec<_>>(),
                    "alternate-zone creation failed with non-retryable codes; stopping"
                );
                return Ok(completed);
            }
        }

        warn!(
            correlation = %self.correlation,
            operation = %completed.name,
            attempts = max_attempts,
            "zonal re-attempts exhausted; returning last failed operation"
        );
        Ok(completed)
    }

    fn has_retryable_code(&self, op: &Operation) -> bool {
        op.error_codes()
            .any(|code| self.retry.retryable_codes.contains(code))
    }
}

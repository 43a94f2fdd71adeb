//! Grid starter — reconcile a stopped instance to the caller's request,
//! then start it.
//!
//! Whatever the request actually asks for (machine type, service
//! account, extra labels, extra metadata) is submitted up front without
//! waiting between submissions; fields the request leaves unset are
//! skipped entirely, never reset to defaults. Only once every submitted
//! write has completed does the start call go out — completion order
//! across the writes is unspecified and nothing here depends on it.

use std::sync::Arc;

use tracing::{debug, info};

use gridpool_compute::{
    ComputeBackend, DesiredGridConfig, Instance, InstanceStatus, Operation,
};
use gridpool_ops::{FingerprintUpdater, OperationDriver};

use crate::error::{ProvisionError, ProvisionResult};
use crate::settings::ProvisionSettings;

/// Reconciles and starts stopped grids.
#[derive(Clone)]
pub struct GridStarter {
    backend: Arc<dyn ComputeBackend>,
    driver: OperationDriver,
    updater: FingerprintUpdater,
    settings: Arc<ProvisionSettings>,
}

impl GridStarter {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        driver: OperationDriver,
        updater: FingerprintUpdater,
        settings: Arc<ProvisionSettings>,
    ) -> Self {
        Self {
            backend,
            driver,
            updater,
            settings,
        }
    }

    /// Bring a TERMINATED instance up to the caller's requested shape and
    /// start it. Returns the completed start operation.
    pub async fn start(
        &self,
        instance: &mut Instance,
        desired: &DesiredGridConfig,
    ) -> ProvisionResult<Operation> {
        if instance.status != InstanceStatus::Terminated {
            return Err(ProvisionError::NotStopped {
                name: instance.name.clone(),
                status: instance.status,
            });
        }

        let pending = self.submit_reconciliation(instance, desired).await?;
        let submitted = pending.len();
        for op in pending {
            let done = self
                .driver
                .block_until_complete(op, self.settings.poll_interval, self.settings.update_timeout)
                .await?;
            if !done.succeeded() {
                return Err(ProvisionError::ReconcileFailed { operation: done });
            }
        }
        debug!(
            correlation = %self.driver.correlation(),
            grid = %instance.name,
            writes = submitted,
            "pre-start reconciliation complete"
        );

        let zone = instance.zone.clone();
        let name = instance.name.clone();
        let start_op = self
            .driver
            .execute_once("start_instance", || self.backend.start_instance(&zone, &name))
            .await?;
        let done = self
            .driver
            .block_until_complete(
                start_op,
                self.settings.poll_interval,
                self.settings.start_timeout,
            )
            .await?;
        if !done.succeeded() {
            return Err(ProvisionError::StartFailed { operation: done });
        }
        info!(
            correlation = %self.driver.correlation(),
            grid = %name,
            zone = %zone,
            "grid started"
        );
        Ok(done)
    }

    /// Submit whichever reconciliation writes are requested and actually
    /// change something; return the unawaited operations.
    async fn submit_reconciliation(
        &self,
        instance: &mut Instance,
        desired: &DesiredGridConfig,
    ) -> ProvisionResult<Vec<Operation>> {
        let mut pending = Vec::new();
        let zone = instance.zone.clone();
        let name = instance.name.clone();

        if let Some(machine_type) = &desired.machine_type
            && *machine_type != instance.machine_type
        {
            let op = self
                .driver
                .execute_once("set_machine_type", || {
                    self.backend.set_machine_type(&zone, &name, machine_type)
                })
                .await?;
            pending.push(op);
        }

        if let Some(account) = &desired.service_account
            && Some(account.as_str()) != instance.service_account.as_deref()
        {
            let op = self
                .driver
                .execute_once("set_service_account", || {
                    self.backend.set_service_account(&zone, &name, account)
                })
                .await?;
            pending.push(op);
        }

        if !desired.labels.is_empty() && !map_contains(&instance.labels, &desired.labels) {
            let op = self.updater.update_labels(instance, &desired.labels).await?;
            pending.push(op);
        }

        if !desired.metadata.is_empty() && !map_contains(&instance.metadata, &desired.metadata) {
            let op = self
                .updater
                .update_metadata(instance, &desired.metadata)
                .await?;
            pending.push(op);
        }

        Ok(pending)
    }
}

/// Whether `current` already contains every pair of `wanted`.
fn map_contains(
    current: &std::collections::HashMap<String, String>,
    wanted: &std::collections::HashMap<String, String>,
) -> bool {
    wanted
        .iter()
        .all(|(k, v)| current.get(k).map(String::as_str) == Some(v.as_str()))
}

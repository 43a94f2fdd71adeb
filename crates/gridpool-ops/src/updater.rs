//! Fingerprint-gated label and metadata updates.
//!
//! The backend only accepts full replacement writes for labels and
//! metadata, each gated on an opaque per-field fingerprint. A fingerprint
//! is consumed by the write it was sent with; reusing it loses. This
//! updater merges partial changes into the caller's local [`Instance`]
//! copy, submits the merge under the current fingerprint, and immediately
//! poisons the local fingerprint with a stale sentinel so a later update
//! on the same object re-fetches instead of replaying a consumed token.
//!
//! Labels and metadata are tracked independently: updating one never
//! invalidates the other.

use std::sync::Arc;

use tracing::debug;

use gridpool_compute::types::CorrelationId;
use gridpool_compute::{ComputeBackend, ComputeError, Instance, Labels, Metadata, Operation};

use crate::error::{OpsError, OpsResult};

/// Local-fingerprint sentinel marking "consumed by a previous write".
/// Backend-issued fingerprints are base64-flavored and never collide
/// with it.
pub const STALE_FINGERPRINT: &str = "<stale>";

/// Applies partial label/metadata changes under optimistic concurrency.
#[derive(Clone)]
pub struct FingerprintUpdater {
    backend: Arc<dyn ComputeBackend>,
    correlation: CorrelationId,
}

impl FingerprintUpdater {
    pub fn new(backend: Arc<dyn ComputeBackend>, correlation: CorrelationId) -> Self {
        Self {
            backend,
            correlation,
        }
    }

    /// Merge `partial` into the instance's labels (caller values win) and
    /// submit the replacement set. The returned operation has not been
    /// waited on.
    pub async fn update_labels(
        &self,
        instance: &mut Instance,
        partial: &Labels,
    ) -> OpsResult<Operation> {
        if instance.label_fingerprint == STALE_FINGERPRINT {
            self.resync_labels(instance).await?;
        }

        let mut merged = instance.labels.clone();
        merged.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));

        let op = self
            .backend
            .set_labels(
                &instance.zone,
                &instance.name,
                &merged,
                &instance.label_fingerprint,
            )
            .await
            .map_err(|source| self.annotate(source))?;

        instance.labels = merged;
        // The true post-write fingerprint is unknown until the next fetch.
        instance.label_fingerprint = STALE_FINGERPRINT.to_string();
        Ok(op)
    }

    /// Metadata twin of [`Self::update_labels`], with its own independent
    /// fingerprint and staleness tracking.
    pub async fn update_metadata(
        &self,
        instance: &mut Instance,
        partial: &Metadata,
    ) -> OpsResult<Operation> {
        if instance.metadata_fingerprint == STALE_FINGERPRINT {
            self.resync_metadata(instance).await?;
        }

        let mut merged = instance.metadata.clone();
        merged.extend(partial.iter().map(|(k, v)| (k.clone(), v.clone())));

        let op = self
            .backend
            .set_metadata(
                &instance.zone,
                &instance.name,
                &merged,
                &instance.metadata_fingerprint,
            )
            .await
            .map_err(|source| self.annotate(source))?;

        instance.metadata = merged;
        instance.metadata_fingerprint = STALE_FINGERPRINT.to_string();
        Ok(op)
    }

    async fn resync_labels(&self, instance: &mut Instance) -> OpsResult<()> {
        let fresh = self.refetch(instance).await?;
        debug!(
            correlation = %self.correlation,
            instance = %instance.name,
            "re-fetched labels before update (local fingerprint was stale)"
        );
        instance.labels = fresh.labels;
        instance.label_fingerprint = fresh.label_fingerprint;
        Ok(())
    }

    async fn resync_metadata(&self, instance: &mut Instance) -> OpsResult<()> {
        let fresh = self.refetch(instance).await?;
        debug!(
            correlation = %self.correlation,
            instance = %instance.name,
            "re-fetched metadata before update (local fingerprint was stale)"
        );
        instance.metadata = fresh.metadata;
        instance.metadata_fingerprint = fresh.metadata_fingerprint;
        Ok(())
    }

    async fn refetch(&self, instance: &Instance) -> OpsResult<Instance> {
        self.backend
            .get_instance(&instance.zone, &instance.name)
            .await
            .map_err(|source| self.annotate(source))?
            .ok_or_else(|| {
                self.annotate(ComputeError::NotFound(format!(
                    "instance {}/{} disappeared during update",
                    instance.zone, instance.name
                )))
            })
    }

    fn annotate(&self, source: ComputeError) -> OpsError {
        OpsError::Backend {
            correlation: self.correlation.clone(),
            source,
        }
    }
}

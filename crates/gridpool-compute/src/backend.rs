//! The compute backend seam.
//!
//! Everything GridPool knows about the cloud provider goes through this
//! trait: blocking-style calls that either return a resource snapshot or
//! an [`Operation`] handle to an asynchronous mutation. Implementations
//! must not retry — retry and failover policy belongs to the layers above.

use async_trait::async_trait;

use crate::error::ComputeResult;
use crate::types::{Image, Instance, InstanceTemplate, Labels, Metadata, Operation};

/// Client for the cloud compute API.
///
/// Mutating calls return an [`Operation`] that the caller drives to a
/// terminal state; read calls return current (eventually-consistent)
/// snapshots.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    // ── Instances ──────────────────────────────────────────────

    async fn get_instance(&self, zone: &str, name: &str) -> ComputeResult<Option<Instance>>;

    /// List instances in a zone matching a backend filter expression,
    /// capped at `max_results`.
    async fn list_instances(
        &self,
        zone: &str,
        filter: &str,
        max_results: u32,
    ) -> ComputeResult<Vec<Instance>>;

    async fn insert_instance(
        &self,
        zone: &str,
        template: &InstanceTemplate,
    ) -> ComputeResult<Operation>;

    async fn delete_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation>;

    async fn start_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation>;

    async fn stop_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation>;

    /// Replace the full label set, gated on the given fingerprint.
    async fn set_labels(
        &self,
        zone: &str,
        name: &str,
        labels: &Labels,
        fingerprint: &str,
    ) -> ComputeResult<Operation>;

    /// Replace the full metadata set, gated on the given fingerprint.
    async fn set_metadata(
        &self,
        zone: &str,
        name: &str,
        metadata: &Metadata,
        fingerprint: &str,
    ) -> ComputeResult<Operation>;

    async fn set_machine_type(
        &self,
        zone: &str,
        name: &str,
        machine_type: &str,
    ) -> ComputeResult<Operation>;

    async fn set_service_account(
        &self,
        zone: &str,
        name: &str,
        email: &str,
    ) -> ComputeResult<Operation>;

    // ── Images ─────────────────────────────────────────────────

    /// Latest non-deprecated image of a family.
    async fn get_image_from_family(&self, family: &str) -> ComputeResult<Option<Image>>;

    async fn list_images(&self, filter: &str, max_results: u32) -> ComputeResult<Vec<Image>>;

    // ── Operations ─────────────────────────────────────────────

    /// Re-fetch a zonal operation by name.
    async fn get_zone_operation(&self, zone: &str, name: &str) -> ComputeResult<Operation>;
}

//! Grid generator — creates a fresh instance from a source image.
//!
//! The creation request is built exactly once; the zone-failover variant
//! factory resubmits the identical template with only the target zone
//! swapped, so a re-attempted grid is the same grid in a different zone.

use std::sync::Arc;

use tracing::info;

use gridpool_compute::types::keys;
use gridpool_compute::{
    ComputeBackend, DesiredGridConfig, Image, InstanceTemplate, Labels, Metadata, Operation,
    RandomSource,
};
use gridpool_compute::types::AttachedDisk;
use gridpool_ops::OperationDriver;

use crate::error::{ProvisionError, ProvisionResult};
use crate::settings::ProvisionSettings;

/// Result of a successful generation: the name the grid was created
/// under and the terminal insert operation.
#[derive(Debug, Clone)]
pub struct GeneratedGrid {
    pub name: String,
    pub zone: String,
    pub operation: Operation,
}

/// Builds and submits new-instance creation requests.
#[derive(Clone)]
pub struct GridGenerator {
    backend: Arc<dyn ComputeBackend>,
    driver: OperationDriver,
    rng: RandomSource,
    settings: Arc<ProvisionSettings>,
}

impl GridGenerator {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        driver: OperationDriver,
        rng: RandomSource,
        settings: Arc<ProvisionSettings>,
    ) -> Self {
        Self {
            backend,
            driver,
            rng,
            settings,
        }
    }

    /// Create a grid from `image` in `zone` (or, on capacity failures,
    /// an alternate zone). Fails hard when the final operation is still
    /// a failure.
    pub async fn create(
        &self,
        desired: &DesiredGridConfig,
        image: &Image,
        zone: &str,
    ) -> ProvisionResult<GeneratedGrid> {
        let name = format!(
            "{}-{}",
            image.family,
            self.rng.suffix(self.settings.name_suffix_len)
        );
        let template = self.template(desired, image, &name);

        info!(
            correlation = %self.driver.correlation(),
            grid = %name,
            image = %image.name,
            zone,
            "generating grid"
        );

        let backend = Arc::clone(&self.backend);
        let operation = self
            .driver
            .execute_with_zonal_reattempt(
                zone,
                self.settings.poll_interval,
                self.settings.create_timeout,
                move |target_zone| {
                    let backend = Arc::clone(&backend);
                    let template = template.clone();
                    async move { backend.insert_instance(&target_zone, &template).await }
                },
            )
            .await?;

        if !operation.succeeded() {
            return Err(ProvisionError::GenerationFailed { operation });
        }

        // The terminal operation records which zone actually won.
        let zone = operation.zone.clone();
        info!(
            correlation = %self.driver.correlation(),
            grid = %name,
            zone = %zone,
            "grid generated"
        );
        Ok(GeneratedGrid {
            name,
            zone,
            operation,
        })
    }

    /// Build the creation request. Pure; reused verbatim across zonal
    /// re-attempts.
    pub fn template(
        &self,
        desired: &DesiredGridConfig,
        image: &Image,
        name: &str,
    ) -> InstanceTemplate {
        InstanceTemplate {
            name: name.to_string(),
            machine_type: desired
                .machine_type
                .clone()
                .unwrap_or_else(|| self.settings.default_machine_type.clone()),
            service_account: desired
                .service_account
                .clone()
                .or_else(|| self.settings.default_service_account.clone()),
            preemptible: desired.preemptible.unwrap_or(false),
            labels: self.merged_labels(desired, image),
            metadata: self.merged_metadata(desired),
            boot_disk: AttachedDisk {
                boot: true,
                source_image_family: Some(image.family.clone()),
                size_gb: self.settings.boot_disk_size_gb,
                disk_type: self.settings.boot_disk_type.clone(),
                auto_delete: true,
            },
            network: self.settings.network.clone(),
            external_ip: desired.external_ip.unwrap_or(false),
        }
    }

    /// Label precedence: server defaults, then the image's labels minus
    /// the private keys, then the caller's labels, then the runtime
    /// source-image-family record. Later sources win on collision.
    fn merged_labels(&self, desired: &DesiredGridConfig, image: &Image) -> Labels {
        let mut labels = self.settings.default_labels.clone();
        labels.extend(
            image
                .labels
                .iter()
                .filter(|(k, _)| !self.settings.image_private_label_keys.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        labels.extend(desired.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        labels.insert(keys::IMAGE_FAMILY.to_string(), image.family.clone());
        labels
    }

    /// Metadata precedence: server defaults overlaid by caller values.
    fn merged_metadata(&self, desired: &DesiredGridConfig) -> Metadata {
        let mut metadata = self.settings.default_metadata.clone();
        metadata.extend(desired.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use gridpool_compute::mock::{InsertOutcome, MockCompute};
    use gridpool_compute::types::CorrelationId;
    use gridpool_ops::ZonalRetryPolicy;

    fn image() -> Image {
        Image {
            name: "img-20240101".to_string(),
            family: "win10-firefox".to_string(),
            labels: Labels::from([
                ("os".to_string(), "win10".to_string()),
                ("browser-1".to_string(), "firefox".to_string()),
                ("image-version".to_string(), "20240101".to_string()),
                ("shots".to_string(), "true".to_string()),
            ]),
        }
    }

    fn generator_with(
        mock: &MockCompute,
        zones: &[&str],
        mut settings: ProvisionSettings,
    ) -> GridGenerator {
        let backend: Arc<dyn ComputeBackend> = Arc::new(mock.clone());
        settings.poll_interval = Duration::from_millis(2);
        let driver = OperationDriver::new(
            Arc::clone(&backend),
            CorrelationId::new("build-1"),
            RandomSource::seeded(5),
            ZonalRetryPolicy {
                zones: zones.iter().map(|z| z.to_string()).collect(),
                retryable_codes: HashSet::from(["ZONE_RESOURCE_POOL_EXHAUSTED".to_string()]),
            },
        );
        GridGenerator::new(backend, driver, RandomSource::seeded(5), Arc::new(settings))
    }

    fn generator_over(mock: &MockCompute, zones: &[&str]) -> GridGenerator {
        generator_with(mock, zones, ProvisionSettings::default())
    }

    #[test]
    fn label_precedence_defaults_image_custom_runtime() {
        let mock = MockCompute::new();
        let generator = generator_over(&mock, &["zone-a"]);

        let desired = DesiredGridConfig {
            labels: Labels::from([
                ("os".to_string(), "win10-custom".to_string()),
                ("team".to_string(), "qa".to_string()),
            ]),
            ..DesiredGridConfig::default()
        };

        let labels = generator.merged_labels(&desired, &image());

        // Server default survives where nothing overrides it.
        assert_eq!(
            labels.get(keys::PLATFORM).map(String::as_str),
            Some("browser-grid")
        );
        // Image labels land, minus the private keys.
        assert_eq!(labels.get("browser-1").map(String::as_str), Some("firefox"));
        assert!(!labels.contains_key("image-version"));
        // Caller overrides the image value.
        assert_eq!(labels.get("os").map(String::as_str), Some("win10-custom"));
        assert_eq!(labels.get("team").map(String::as_str), Some("qa"));
        // Runtime record wins last.
        assert_eq!(
            labels.get(keys::IMAGE_FAMILY).map(String::as_str),
            Some("win10-firefox")
        );
    }

    #[test]
    fn metadata_defaults_are_overlaid_by_caller() {
        let mock = MockCompute::new();
        let mut settings = ProvisionSettings::default();
        settings.default_metadata =
            Metadata::from([("startup".to_string(), "default.sh".to_string())]);
        let generator = generator_with(&mock, &["zone-a"], settings);

        let desired = DesiredGridConfig {
            metadata: Metadata::from([("startup".to_string(), "custom.sh".to_string())]),
            ..DesiredGridConfig::default()
        };
        let metadata = generator.merged_metadata(&desired);
        assert_eq!(metadata.get("startup").map(String::as_str), Some("custom.sh"));
    }

    #[tokio::test(start_paused = true)]
    async fn create_places_the_grid_and_reports_the_winning_zone() {
        let mock = MockCompute::new();
        let generator = generator_over(&mock, &["zone-a", "zone-b", "zone-c"]);

        let generated = generator
            .create(&DesiredGridConfig::default(), &image(), "zone-a")
            .await
            .unwrap();

        assert!(generated.name.starts_with("win10-firefox-"));
        assert_eq!(generated.zone, "zone-a");
        let created = mock.instance("zone-a", &generated.name).unwrap();
        assert_eq!(
            created.labels.get(keys::IMAGE_FAMILY).map(String::as_str),
            Some("win10-firefox")
        );
        assert!(created.disks[0].boot);
    }

    #[tokio::test(start_paused = true)]
    async fn zonal_reattempt_keeps_everything_but_the_zone() {
        let mock = MockCompute::new();
        mock.script_insert("zone-a", InsertOutcome::FailWith("ZONE_RESOURCE_POOL_EXHAUSTED"));
        let generator = generator_over(&mock, &["zone-a", "zone-b", "zone-c"]);

        let desired = DesiredGridConfig {
            machine_type: Some("n2-standard-8".to_string()),
            ..DesiredGridConfig::default()
        };
        let generated = generator.create(&desired, &image(), "zone-a").await.unwrap();

        assert_ne!(generated.zone, "zone-a");
        let created = mock.instance(&generated.zone, &generated.name).unwrap();
        assert_eq!(created.machine_type, "n2-standard-8");
        assert_eq!(created.name, generated.name);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_generation_is_a_hard_failure() {
        let mock = MockCompute::new();
        for zone in ["zone-a", "zone-b", "zone-c"] {
            for _ in 0..8 {
                mock.script_insert(zone, InsertOutcome::FailWith("ZONE_RESOURCE_POOL_EXHAUSTED"));
            }
        }
        let generator = generator_over(&mock, &["zone-a", "zone-b", "zone-c"]);

        let err = generator
            .create(&DesiredGridConfig::default(), &image(), "zone-a")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::GenerationFailed { .. }));
    }
}

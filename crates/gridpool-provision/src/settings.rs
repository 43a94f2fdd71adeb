//! Provisioning defaults and timing bounds.

use std::collections::HashSet;
use std::time::Duration;

use gridpool_compute::types::keys;
use gridpool_compute::{Labels, Metadata};

/// Server-side defaults applied when a request leaves a field unset,
/// plus the per-call-site poll/timeout bounds for driving operations.
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub default_machine_type: String,
    pub default_service_account: Option<String>,
    /// Labels every generated grid starts from (lowest precedence).
    pub default_labels: Labels,
    /// Metadata every generated grid starts from.
    pub default_metadata: Metadata,
    /// Image label keys that must not leak onto generated grids
    /// (internal image-versioning labels and the like).
    pub image_private_label_keys: HashSet<String>,
    pub boot_disk_size_gb: u64,
    pub boot_disk_type: String,
    pub network: String,
    /// Random suffix length appended to the image family in grid names.
    pub name_suffix_len: usize,

    /// Poll cadence for all operation waits.
    pub poll_interval: Duration,
    /// Deadline for cheap metadata-class writes (labels, machine type).
    pub update_timeout: Duration,
    /// Deadline for instance creation.
    pub create_timeout: Duration,
    /// Deadline for instance start.
    pub start_timeout: Duration,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            default_machine_type: "n1-standard-4".to_string(),
            default_service_account: None,
            default_labels: Labels::from([
                (keys::PLATFORM.to_string(), "browser-grid".to_string()),
                (keys::LOCKED_BY.to_string(), keys::UNLOCKED.to_string()),
                (keys::DELETING.to_string(), "false".to_string()),
            ]),
            default_metadata: Metadata::new(),
            image_private_label_keys: HashSet::from(["image-version".to_string()]),
            boot_disk_size_gb: 100,
            boot_disk_type: "pd-ssd".to_string(),
            network: "default".to_string(),
            name_suffix_len: 8,
            poll_interval: Duration::from_secs(2),
            update_timeout: Duration::from_secs(60),
            create_timeout: Duration::from_secs(300),
            start_timeout: Duration::from_secs(300),
        }
    }
}

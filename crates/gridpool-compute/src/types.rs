//! Domain types for the GridPool compute backend.
//!
//! These mirror the cloud provider's resource model: instances ("grids"),
//! boot images, and the asynchronous operation handles every mutation
//! returns. Label and metadata maps each carry an opaque fingerprint the
//! backend uses for optimistic concurrency on replacement writes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Label map attached to an instance or image.
pub type Labels = HashMap<String, String>;

/// Metadata map attached to an instance.
pub type Metadata = HashMap<String, String>;

// ── Well-known keys ────────────────────────────────────────────────

/// Label and metadata keys that make up the coordination protocol.
pub mod keys {
    /// Label holding the correlation id of the build that owns the grid.
    pub const LOCKED_BY: &str = "grid-locked-by";
    /// Value of [`LOCKED_BY`] meaning the grid is free.
    pub const UNLOCKED: &str = "none";
    /// Label flagging a grid that is about to be deleted.
    pub const DELETING: &str = "grid-deleting";
    /// Label recording the image family a grid was generated from.
    pub const IMAGE_FAMILY: &str = "grid-image-family";
    /// Caller-visible identifier label for stopped grids.
    pub const CUSTOM_ID: &str = "grid-custom-id";
    /// Metadata key carrying the current test session id.
    pub const SESSION_ID: &str = "grid-session-id";

    /// Capability labels searched on grids and images.
    pub const PLATFORM: &str = "platform";
    pub const OS: &str = "os";
    pub const SHOTS: &str = "shots";
    /// An image may host several browsers; each occupies one slot label.
    pub const BROWSER_SLOTS: [&str; 3] = ["browser-1", "browser-2", "browser-3"];
}

// ── Instance ──────────────────────────────────────────────────────

/// Lifecycle status of an instance, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Staging => "STAGING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Suspending => "SUSPENDING",
            Self::Suspended => "SUSPENDED",
            Self::Repairing => "REPAIRING",
            Self::Terminated => "TERMINATED",
        }
    }
}

/// External-IP access configuration on a network interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    pub name: String,
    #[serde(default)]
    pub external_ip: Option<String>,
}

/// A network interface attached to an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub network: String,
    #[serde(default)]
    pub internal_ip: Option<String>,
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

/// A disk attached to an instance (or requested for one).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    pub boot: bool,
    /// Image family the disk is initialized from (creation requests only).
    #[serde(default)]
    pub source_image_family: Option<String>,
    pub size_gb: u64,
    pub disk_type: String,
    pub auto_delete: bool,
}

/// A VM instance used as a disposable browser-test execution host.
///
/// Mutated only through the backend; callers re-fetch after any mutation
/// whose result they rely on. The two fingerprints version the label and
/// metadata sets independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    pub id: u64,
    pub zone: String,
    pub status: InstanceStatus,
    pub machine_type: String,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub disks: Vec<AttachedDisk>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub label_fingerprint: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub metadata_fingerprint: String,
    #[serde(default)]
    pub preemptible: bool,
}

impl Instance {
    /// Correlation id of the build holding this grid, or the unlocked
    /// sentinel if nobody does.
    pub fn lock_holder(&self) -> &str {
        self.labels
            .get(keys::LOCKED_BY)
            .map(String::as_str)
            .unwrap_or(keys::UNLOCKED)
    }

    pub fn is_locked(&self) -> bool {
        let holder = self.lock_holder();
        !holder.is_empty() && holder != keys::UNLOCKED
    }

    /// Whether a deletion pass has flagged this grid for removal.
    pub fn is_deleting(&self) -> bool {
        self.labels.get(keys::DELETING).map(String::as_str) == Some("true")
    }

    pub fn internal_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .and_then(|nic| nic.internal_ip.as_deref())
    }

    pub fn external_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .and_then(|nic| nic.access_configs.first())
            .and_then(|ac| ac.external_ip.as_deref())
    }
}

/// Creation request for a new instance.
///
/// Everything except the target zone is fixed at build time, so a zonal
/// retry resubmits the identical template to a different zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTemplate {
    pub name: String,
    pub machine_type: String,
    #[serde(default)]
    pub service_account: Option<String>,
    pub preemptible: bool,
    pub labels: Labels,
    pub metadata: Metadata,
    pub boot_disk: AttachedDisk,
    pub network: String,
    /// Attach an external-IP access config to the NIC.
    pub external_ip: bool,
}

// ── Image ─────────────────────────────────────────────────────────

/// A boot template. Its labels seed the default labels of grids
/// generated from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub name: String,
    pub family: String,
    #[serde(default)]
    pub labels: Labels,
}

// ── Operation ─────────────────────────────────────────────────────

/// State of an asynchronous backend mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

/// One entry of a failed operation's error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Handle to an asynchronous backend mutation.
///
/// A DONE operation is not necessarily a successful one — see
/// [`Operation::succeeded`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    pub zone: String,
    /// Backend verb this operation performs ("insert", "start", ...).
    #[serde(default)]
    pub operation_type: String,
    pub status: OperationStatus,
    /// Link to the resource the operation mutates; empty on failures.
    #[serde(default)]
    pub target_link: Option<String>,
    #[serde(default)]
    pub http_error_status_code: Option<u16>,
    #[serde(default)]
    pub errors: Vec<OperationError>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// The full success predicate: terminal, no reported errors, a 2xx
    /// status code when one is present, and a non-empty target link.
    /// The absence of errors alone does not imply success.
    pub fn succeeded(&self) -> bool {
        self.is_done()
            && self.errors.is_empty()
            && self
                .http_error_status_code
                .is_none_or(|code| (200..300).contains(&code))
            && self.target_link.as_deref().is_some_and(|l| !l.is_empty())
    }

    pub fn error_codes(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.code.as_str())
    }

    /// Last path segment of the target link — the mutated resource's name.
    pub fn target_resource_name(&self) -> Option<&str> {
        self.target_link
            .as_deref()
            .and_then(|l| l.rsplit('/').next())
            .filter(|s| !s.is_empty())
    }
}

// ── Request-level types ───────────────────────────────────────────

/// Capability profile a caller asks a grid to satisfy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub os: String,
    pub browser: String,
    #[serde(default)]
    pub shots: bool,
    /// Raw filter fragment AND-ed into instance searches.
    #[serde(default)]
    pub instance_filter: Option<String>,
    /// Raw filter fragment AND-ed into image searches.
    #[serde(default)]
    pub image_filter: Option<String>,
}

/// Per-request overrides for a grid's shape. Unset fields fall back to
/// the server-side defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredGridConfig {
    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub preemptible: Option<bool>,
    #[serde(default)]
    pub external_ip: Option<bool>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Opaque identifier of the calling build, used for log correlation and
/// as the lock value written into an instance's lock label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

//! End-to-end acquisition and release scenarios against the mock
//! backend: each test drives the full pool service the way the API
//! layer does.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use gridpool_acquire::{
    Acquisition, AcquireError, AcquireSettings, GiveUpReason, GridPool, GridRequest,
    InMemoryReservations, ReleaseOutcome, ReleaseRequest, reuse_running,
};
use gridpool_compute::mock::MockCompute;
use gridpool_compute::types::{CorrelationId, keys};
use gridpool_compute::{
    CapabilityProfile, ComputeBackend, ComputeResult, DesiredGridConfig, Image, Instance,
    InstanceStatus, InstanceTemplate, Labels, Metadata, Operation, RandomSource,
};
use gridpool_ops::ZonalRetryPolicy;
use gridpool_provision::ProvisionSettings;
use gridpool_search::SearchSettings;

const ZONE: &str = "zone-a";

fn profile() -> CapabilityProfile {
    CapabilityProfile {
        os: "win10".to_string(),
        browser: "firefox".to_string(),
        shots: true,
        instance_filter: None,
        image_filter: None,
    }
}

fn capability_labels() -> Labels {
    Labels::from([
        (keys::PLATFORM.to_string(), "browser-grid".to_string()),
        (keys::OS.to_string(), "win10".to_string()),
        ("browser-1".to_string(), "firefox".to_string()),
        (keys::SHOTS.to_string(), "true".to_string()),
        (keys::LOCKED_BY.to_string(), keys::UNLOCKED.to_string()),
        (keys::DELETING.to_string(), "false".to_string()),
    ])
}

fn pool_instance(name: &str, status: InstanceStatus) -> Instance {
    Instance {
        name: name.to_string(),
        id: 500,
        zone: ZONE.to_string(),
        status,
        machine_type: "n1-standard-4".to_string(),
        service_account: None,
        network_interfaces: vec![gridpool_compute::types::NetworkInterface {
            network: "default".to_string(),
            internal_ip: Some("10.0.0.9".to_string()),
            access_configs: Vec::new(),
        }],
        disks: Vec::new(),
        labels: capability_labels(),
        label_fingerprint: "fp-seed-l".to_string(),
        metadata: Metadata::new(),
        metadata_fingerprint: "fp-seed-m".to_string(),
        preemptible: false,
    }
}

fn grid_image() -> Image {
    Image {
        name: "img-win10-ff-001".to_string(),
        family: "win10-firefox-shots".to_string(),
        labels: Labels::from([
            (keys::PLATFORM.to_string(), "browser-grid".to_string()),
            (keys::OS.to_string(), "win10".to_string()),
            ("browser-1".to_string(), "firefox".to_string()),
            (keys::SHOTS.to_string(), "true".to_string()),
            ("image-version".to_string(), "001".to_string()),
        ]),
    }
}

fn request() -> GridRequest {
    GridRequest {
        zone: ZONE.to_string(),
        profile: profile(),
        desired: DesiredGridConfig::default(),
        no_rush: false,
        source_image_family: None,
    }
}

fn pool_over(backend: Arc<dyn ComputeBackend>) -> GridPool {
    let mut provision = ProvisionSettings::default();
    provision.poll_interval = Duration::from_millis(2);
    let mut acquire = AcquireSettings::default();
    acquire.poll_interval = Duration::from_millis(2);
    GridPool::new(
        backend,
        Arc::new(InMemoryReservations::new()),
        RandomSource::seeded(17),
        ZonalRetryPolicy {
            zones: vec!["zone-a".to_string(), "zone-b".to_string(), "zone-c".to_string()],
            retryable_codes: HashSet::from(["ZONE_RESOURCE_POOL_EXHAUSTED".to_string()]),
        },
        SearchSettings::default(),
        provision,
        acquire,
    )
}

fn mock_pool(mock: &MockCompute) -> GridPool {
    pool_over(Arc::new(mock.clone()))
}

fn correlation() -> CorrelationId {
    CorrelationId::new("build-42")
}

// ── Acquisition ────────────────────────────────────────────────────

#[tokio::test]
async fn no_match_anywhere_generates_from_a_searched_image() {
    let mock = MockCompute::new();
    mock.add_image(grid_image());
    let pool = mock_pool(&mock);

    let grid = pool.acquire(correlation(), &request()).await.unwrap();

    assert!(grid.name.starts_with("win10-firefox-shots-"));
    assert!(!grid.name.is_empty());
    assert!(grid.internal_ip().is_some());
    assert_eq!(grid.status, InstanceStatus::Running);
    assert_eq!(grid.lock_holder(), "build-42");
    assert!(mock.called("list_images"));
    assert!(mock.called("insert_instance"));
}

#[tokio::test]
async fn stopped_match_is_locked_started_and_verified() {
    let mock = MockCompute::new();
    mock.add_instance(pool_instance("grid-stopped", InstanceStatus::Terminated));
    let pool = mock_pool(&mock);

    let grid = pool.acquire(correlation(), &request()).await.unwrap();

    assert_eq!(grid.name, "grid-stopped");
    assert_eq!(grid.status, InstanceStatus::Running);
    assert_eq!(grid.lock_holder(), "build-42");
    assert!(!grid.is_deleting());
    // The whole request was served from the pool: no image search, no
    // instance insert.
    assert!(!mock.called("list_images"));
    assert!(!mock.called("get_image_from_family"));
    assert!(!mock.called("insert_instance"));
}

#[tokio::test]
async fn running_match_is_reused_without_starting() {
    let mock = MockCompute::new();
    mock.add_instance(pool_instance("grid-running", InstanceStatus::Running));
    let pool = mock_pool(&mock);

    let grid = pool.acquire(correlation(), &request()).await.unwrap();

    assert_eq!(grid.name, "grid-running");
    assert_eq!(grid.lock_holder(), "build-42");
    assert!(!mock.called("start_instance"));
    assert!(!mock.called("insert_instance"));
}

#[tokio::test]
async fn no_rush_skips_the_pool_searches() {
    let mock = MockCompute::new();
    mock.add_image(grid_image());
    // Perfectly reusable grids exist, but no-rush must ignore them.
    mock.add_instance(pool_instance("grid-running", InstanceStatus::Running));
    let pool = mock_pool(&mock);

    let mut req = request();
    req.no_rush = true;
    let grid = pool.acquire(correlation(), &req).await.unwrap();

    assert!(grid.name.starts_with("win10-firefox-shots-"));
    assert!(!mock.called("list_instances"));
}

#[tokio::test]
async fn explicit_image_family_bypasses_image_search() {
    let mock = MockCompute::new();
    mock.add_image(grid_image());
    let pool = mock_pool(&mock);

    let mut req = request();
    req.no_rush = true;
    req.source_image_family = Some("win10-firefox-shots".to_string());
    let grid = pool.acquire(correlation(), &req).await.unwrap();

    assert!(grid.name.starts_with("win10-firefox-shots-"));
    assert!(mock.called("get_image_from_family"));
    assert!(!mock.called("list_images"));
}

#[tokio::test]
async fn missing_image_is_a_hard_error_not_a_give_up() {
    let mock = MockCompute::new();
    let pool = mock_pool(&mock);

    let err = pool.acquire(correlation(), &request()).await.unwrap_err();
    assert!(matches!(err, AcquireError::ImageNotFound(_)));
}

#[tokio::test]
async fn generated_grid_carries_merged_labels() {
    let mock = MockCompute::new();
    mock.add_image(grid_image());
    let pool = mock_pool(&mock);

    let mut req = request();
    req.desired.labels = Labels::from([("team".to_string(), "qa".to_string())]);
    let grid = pool.acquire(correlation(), &req).await.unwrap();

    // Image capability labels arrived, private image keys did not.
    assert_eq!(grid.labels.get(keys::OS).map(String::as_str), Some("win10"));
    assert!(!grid.labels.contains_key("image-version"));
    assert_eq!(grid.labels.get("team").map(String::as_str), Some("qa"));
    assert_eq!(
        grid.labels.get(keys::IMAGE_FAMILY).map(String::as_str),
        Some("win10-firefox-shots")
    );
}

#[tokio::test]
async fn reuse_gives_up_when_every_candidate_is_reserved_in_process() {
    let mock = MockCompute::new();
    mock.add_instance(pool_instance("grid-running", InstanceStatus::Running));

    // Another worker in this process already reserved the only
    // candidate and its remote lock write is still in flight.
    let reservations = Arc::new(InMemoryReservations::new());
    let other = CorrelationId::new("build-other");
    use gridpool_acquire::ReservationLedger;
    assert!(reservations.claim(500, &other));

    let pool = GridPool::new(
        Arc::new(mock.clone()),
        reservations,
        RandomSource::seeded(17),
        ZonalRetryPolicy::default(),
        SearchSettings::default(),
        ProvisionSettings::default(),
        AcquireSettings {
            poll_interval: Duration::from_millis(2),
            ..AcquireSettings::default()
        },
    );

    let ctx = pool.context(correlation());
    let outcome = reuse_running(&ctx, &request()).await.unwrap();
    match outcome {
        Acquisition::GiveUp(GiveUpReason::ContentionExhausted { attempts }) => {
            assert_eq!(attempts, 5)
        }
        other => panic!("expected contention give-up, got {other:?}"),
    }
    // The remote lock was never attempted: the in-process reservation
    // stopped us before any label write.
    assert!(!mock.called("set_labels"));
}

// A backend in which some other process steals the lock label while the
// start operation runs — the window the post-start verification exists
// to catch.
#[derive(Clone)]
struct LockThief {
    inner: MockCompute,
}

#[async_trait]
impl ComputeBackend for LockThief {
    async fn get_instance(&self, zone: &str, name: &str) -> ComputeResult<Option<Instance>> {
        self.inner.get_instance(zone, name).await
    }
    async fn list_instances(
        &self,
        zone: &str,
        filter: &str,
        max_results: u32,
    ) -> ComputeResult<Vec<Instance>> {
        self.inner.list_instances(zone, filter, max_results).await
    }
    async fn insert_instance(
        &self,
        zone: &str,
        template: &InstanceTemplate,
    ) -> ComputeResult<Operation> {
        self.inner.insert_instance(zone, template).await
    }
    async fn delete_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        self.inner.delete_instance(zone, name).await
    }
    async fn start_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        let op = self.inner.start_instance(zone, name).await?;
        // The theft happens mid-start, after our lock write landed.
        self.inner.tamper_instance(zone, name, |inst| {
            inst.labels
                .insert(keys::LOCKED_BY.to_string(), "build-intruder".to_string());
        });
        Ok(op)
    }
    async fn stop_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        self.inner.stop_instance(zone, name).await
    }
    async fn set_labels(
        &self,
        zone: &str,
        name: &str,
        labels: &Labels,
        fingerprint: &str,
    ) -> ComputeResult<Operation> {
        self.inner.set_labels(zone, name, labels, fingerprint).await
    }
    async fn set_metadata(
        &self,
        zone: &str,
        name: &str,
        metadata: &Metadata,
        fingerprint: &str,
    ) -> ComputeResult<Operation> {
        self.inner
            .set_metadata(zone, name, metadata, fingerprint)
            .await
    }
    async fn set_machine_type(
        &self,
        zone: &str,
        name: &str,
        machine_type: &str,
    ) -> ComputeResult<Operation> {
        self.inner.set_machine_type(zone, name, machine_type).await
    }
    async fn set_service_account(
        &self,
        zone: &str,
        name: &str,
        email: &str,
    ) -> ComputeResult<Operation> {
        self.inner.set_service_account(zone, name, email).await
    }
    async fn get_image_from_family(&self, family: &str) -> ComputeResult<Option<Image>> {
        self.inner.get_image_from_family(family).await
    }
    async fn list_images(&self, filter: &str, max_results: u32) -> ComputeResult<Vec<Image>> {
        self.inner.list_images(filter, max_results).await
    }
    async fn get_zone_operation(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        self.inner.get_zone_operation(zone, name).await
    }
}

#[tokio::test]
async fn lock_stolen_mid_start_is_an_invariant_violation() {
    let mock = MockCompute::new();
    mock.add_instance(pool_instance("grid-stopped", InstanceStatus::Terminated));
    let pool = pool_over(Arc::new(LockThief { inner: mock.clone() }));

    let err = pool.acquire(correlation(), &request()).await.unwrap_err();
    assert!(matches!(
        err,
        AcquireError::Invariant(gridpool_acquire::InvariantViolation::OccupiedByOther { .. })
    ));
}

// ── Release / delete ───────────────────────────────────────────────

fn release_request(no_rush: bool, require_running_vm: bool) -> ReleaseRequest {
    ReleaseRequest {
        zone: ZONE.to_string(),
        name: "grid-running".to_string(),
        no_rush,
        require_running_vm,
        session_id: Some("session-7".to_string()),
    }
}

#[tokio::test]
async fn plain_release_clears_the_lock_and_keeps_the_grid() {
    let mock = MockCompute::new();
    let mut held = pool_instance("grid-running", InstanceStatus::Running);
    held.labels
        .insert(keys::LOCKED_BY.to_string(), "build-42".to_string());
    held.metadata
        .insert(keys::SESSION_ID.to_string(), "session-7".to_string());
    mock.add_instance(held);
    let pool = mock_pool(&mock);

    let outcome = pool
        .release(correlation(), &release_request(false, false))
        .await
        .unwrap();
    assert_eq!(outcome, ReleaseOutcome::Released);

    let kept = mock.instance(ZONE, "grid-running").unwrap();
    assert_eq!(kept.lock_holder(), keys::UNLOCKED);
    assert_eq!(
        kept.metadata.get(keys::SESSION_ID).map(String::as_str),
        Some(keys::UNLOCKED)
    );
    assert!(!mock.called("delete_instance"));
}

#[tokio::test]
async fn no_rush_delete_flags_first_then_deletes() {
    let mock = MockCompute::new();
    mock.add_instance(pool_instance("grid-running", InstanceStatus::Running));
    let pool = mock_pool(&mock);

    let outcome = pool
        .release(correlation(), &release_request(true, false))
        .await
        .unwrap();
    assert_eq!(outcome, ReleaseOutcome::Deleted);
    assert!(mock.instance(ZONE, "grid-running").is_none());

    // The deleting flag write completed before the delete was issued.
    let calls = mock.calls();
    let flag_at = calls
        .iter()
        .position(|c| c.starts_with("set_labels"))
        .expect("the deleting flag must be written");
    let delete_at = calls
        .iter()
        .position(|c| c.starts_with("delete_instance"))
        .expect("the grid must be deleted");
    assert!(flag_at < delete_at);
}

#[tokio::test]
async fn already_flagged_grid_is_deleted_directly() {
    let mock = MockCompute::new();
    let mut doomed = pool_instance("grid-running", InstanceStatus::Running);
    doomed
        .labels
        .insert(keys::DELETING.to_string(), "true".to_string());
    mock.add_instance(doomed);
    let pool = mock_pool(&mock);

    let outcome = pool
        .release(correlation(), &release_request(false, true))
        .await
        .unwrap();
    assert_eq!(outcome, ReleaseOutcome::Deleted);
    assert!(!mock.called("set_labels"));
}

#[tokio::test]
async fn deleting_a_missing_grid_is_not_found() {
    let mock = MockCompute::new();
    let pool = mock_pool(&mock);

    let err = pool
        .release(correlation(), &release_request(true, false))
        .await
        .unwrap_err();
    assert!(matches!(err, AcquireError::InstanceNotFound(_)));
}

//! REST API handlers.
//!
//! Request/response envelopes for the grid endpoints. Give-ups never
//! reach this layer (the orchestrator consumes them falling through its
//! strategies); whatever arrives here is either a ready grid or a hard
//! failure mapped to a FAILURE envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use gridpool_acquire::{AcquireError, GridRequest, ReleaseOutcome, ReleaseRequest};
use gridpool_compute::types::CorrelationId;
use gridpool_compute::{CapabilityProfile, DesiredGridConfig, Instance};
use gridpool_ops::OpsError;

use crate::ApiState;

// ── Envelopes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Grid details returned on successful acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPayload {
    pub name: String,
    pub zone: String,
    pub id: u64,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
}

impl GridPayload {
    fn from_instance(instance: &Instance) -> Self {
        Self {
            name: instance.name.clone(),
            zone: instance.zone.clone(),
            id: instance.id,
            internal_ip: instance.internal_ip().map(str::to_string),
            external_ip: instance.external_ip().map(str::to_string),
        }
    }
}

/// Response envelope shared by both endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridEnvelope {
    pub status: ResponseStatus,
    /// HTTP-equivalent status code, mirrored into the envelope.
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GridEnvelope {
    fn success(code: StatusCode) -> Self {
        Self {
            status: ResponseStatus::Success,
            code: code.as_u16(),
            grid: None,
            deleted: None,
            error: None,
        }
    }

    fn failure(code: StatusCode, message: String) -> (StatusCode, Json<Self>) {
        (
            code,
            Json(Self {
                status: ResponseStatus::Failure,
                code: code.as_u16(),
                grid: None,
                deleted: None,
                error: Some(message),
            }),
        )
    }
}

fn failure_for(err: &AcquireError) -> (StatusCode, Json<GridEnvelope>) {
    let code = match err {
        AcquireError::ImageNotFound(_) | AcquireError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
        AcquireError::Invariant(_) => StatusCode::CONFLICT,
        AcquireError::Ops(OpsError::PollTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        AcquireError::Ops(OpsError::Backend { .. }) => StatusCode::BAD_GATEWAY,
        AcquireError::DeleteFailed { .. } | AcquireError::Provision(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    GridEnvelope::failure(code, err.to_string())
}

// ── Requests ───────────────────────────────────────────────────────

/// Body of `POST /v1/zones/{zone}/grids`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGridBody {
    pub correlation_id: String,
    #[serde(default)]
    pub profile: CapabilityProfile,
    #[serde(default)]
    pub config: DesiredGridConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateGridQuery {
    #[serde(default, rename = "noRush")]
    pub no_rush: bool,
    #[serde(default, rename = "sourceImageFamily")]
    pub source_image_family: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteGridQuery {
    #[serde(default, rename = "noRush")]
    pub no_rush: bool,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, rename = "requireRunningVM")]
    pub require_running_vm: bool,
}

// ── Handlers ───────────────────────────────────────────────────────

/// POST /v1/zones/{zone}/grids
pub async fn create_grid(
    State(state): State<ApiState>,
    Path(zone): Path<String>,
    Query(query): Query<CreateGridQuery>,
    Json(body): Json<CreateGridBody>,
) -> impl IntoResponse {
    let correlation = CorrelationId::new(body.correlation_id.clone());
    let request = GridRequest {
        zone,
        profile: body.profile,
        desired: body.config,
        no_rush: query.no_rush,
        source_image_family: query.source_image_family,
    };

    match state.pool.acquire(correlation.clone(), &request).await {
        Ok(instance) => {
            info!(
                correlation = %correlation,
                grid = %instance.name,
                zone = %instance.zone,
                "grid acquired"
            );
            let mut envelope = GridEnvelope::success(StatusCode::OK);
            envelope.grid = Some(GridPayload::from_instance(&instance));
            (StatusCode::OK, Json(envelope)).into_response()
        }
        Err(err) => {
            error!(correlation = %correlation, error = %err, "grid acquisition failed");
            failure_for(&err).into_response()
        }
    }
}

/// DELETE /v1/zones/{zone}/grids/{name}
pub async fn delete_grid(
    State(state): State<ApiState>,
    Path((zone, name)): Path<(String, String)>,
    Query(query): Query<DeleteGridQuery>,
) -> impl IntoResponse {
    let correlation = CorrelationId::new(
        query
            .session_id
            .clone()
            .unwrap_or_else(|| format!("release-{name}")),
    );
    let request = ReleaseRequest {
        zone,
        name,
        no_rush: query.no_rush,
        require_running_vm: query.require_running_vm,
        session_id: query.session_id,
    };

    match state.pool.release(correlation.clone(), &request).await {
        Ok(outcome) => {
            let mut envelope = GridEnvelope::success(StatusCode::OK);
            envelope.deleted = Some(outcome == ReleaseOutcome::Deleted);
            (StatusCode::OK, Json(envelope)).into_response()
        }
        Err(err) => {
            error!(correlation = %correlation, error = %err, "grid release failed");
            failure_for(&err).into_response()
        }
    }
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use gridpool_acquire::{AcquireSettings, GridPool, InMemoryReservations};
    use gridpool_compute::mock::MockCompute;
    use gridpool_compute::types::keys;
    use gridpool_compute::{
        Image, InstanceStatus, Labels, Metadata, RandomSource,
    };
    use gridpool_ops::ZonalRetryPolicy;
    use gridpool_provision::ProvisionSettings;
    use gridpool_search::SearchSettings;

    fn pool_over(mock: &MockCompute) -> GridPool {
        let mut provision = ProvisionSettings::default();
        provision.poll_interval = Duration::from_millis(2);
        let mut acquire = AcquireSettings::default();
        acquire.poll_interval = Duration::from_millis(2);
        GridPool::new(
            Arc::new(mock.clone()),
            Arc::new(InMemoryReservations::new()),
            RandomSource::seeded(23),
            ZonalRetryPolicy {
                zones: vec![
                    "zone-a".to_string(),
                    "zone-b".to_string(),
                    "zone-c".to_string(),
                ],
                retryable_codes: HashSet::from(["ZONE_RESOURCE_POOL_EXHAUSTED".to_string()]),
            },
            SearchSettings::default(),
            provision,
            acquire,
        )
    }

    fn grid_image() -> Image {
        Image {
            name: "img-001".to_string(),
            family: "win10-firefox-shots".to_string(),
            labels: Labels::from([
                (keys::PLATFORM.to_string(), "browser-grid".to_string()),
                (keys::OS.to_string(), "win10".to_string()),
                ("browser-1".to_string(), "firefox".to_string()),
                (keys::SHOTS.to_string(), "true".to_string()),
            ]),
        }
    }

    fn running_grid(name: &str) -> gridpool_compute::Instance {
        gridpool_compute::Instance {
            name: name.to_string(),
            id: 7,
            zone: "zone-a".to_string(),
            status: InstanceStatus::Running,
            machine_type: "n1-standard-4".to_string(),
            service_account: None,
            network_interfaces: vec![gridpool_compute::types::NetworkInterface {
                network: "default".to_string(),
                internal_ip: Some("10.0.0.7".to_string()),
                access_configs: Vec::new(),
            }],
            disks: Vec::new(),
            labels: Labels::from([
                (keys::PLATFORM.to_string(), "browser-grid".to_string()),
                (keys::OS.to_string(), "win10".to_string()),
                ("browser-1".to_string(), "firefox".to_string()),
                (keys::SHOTS.to_string(), "true".to_string()),
                (keys::LOCKED_BY.to_string(), keys::UNLOCKED.to_string()),
            ]),
            label_fingerprint: "fp-l".to_string(),
            metadata: Metadata::new(),
            metadata_fingerprint: "fp-m".to_string(),
            preemptible: false,
        }
    }

    fn create_body() -> String {
        serde_json::json!({
            "correlation_id": "build-42",
            "profile": { "os": "win10", "browser": "firefox", "shots": true }
        })
        .to_string()
    }

    async fn envelope_of(response: axum::response::Response) -> GridEnvelope {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_generates_a_grid_when_nothing_is_reusable() {
        let mock = MockCompute::new();
        mock.add_image(grid_image());
        let router = crate::build_router(pool_over(&mock));

        let response = router
            .oneshot(
                Request::post("/v1/zones/zone-a/grids")
                    .header("content-type", "application/json")
                    .body(Body::from(create_body()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let envelope = envelope_of(response).await;
        assert_eq!(envelope.status, ResponseStatus::Success);
        let grid = envelope.grid.expect("grid payload");
        assert!(grid.name.starts_with("win10-firefox-shots-"));
        assert!(grid.internal_ip.is_some());
    }

    #[tokio::test]
    async fn create_reuses_a_running_grid() {
        let mock = MockCompute::new();
        mock.add_instance(running_grid("grid-running"));
        let router = crate::build_router(pool_over(&mock));

        let response = router
            .oneshot(
                Request::post("/v1/zones/zone-a/grids")
                    .header("content-type", "application/json")
                    .body(Body::from(create_body()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let envelope = envelope_of(response).await;
        assert_eq!(envelope.grid.expect("grid payload").name, "grid-running");
        assert!(!mock.called("insert_instance"));
    }

    #[tokio::test]
    async fn create_without_image_is_a_404_failure_envelope() {
        let mock = MockCompute::new();
        let router = crate::build_router(pool_over(&mock));

        let response = router
            .oneshot(
                Request::post("/v1/zones/zone-a/grids")
                    .header("content-type", "application/json")
                    .body(Body::from(create_body()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let envelope = envelope_of(response).await;
        assert_eq!(envelope.status, ResponseStatus::Failure);
        assert_eq!(envelope.code, 404);
        assert!(envelope.error.unwrap().contains("image"));
    }

    #[tokio::test]
    async fn delete_without_flags_releases_the_hold() {
        let mock = MockCompute::new();
        let mut held = running_grid("grid-held");
        held.labels
            .insert(keys::LOCKED_BY.to_string(), "build-42".to_string());
        mock.add_instance(held);
        let router = crate::build_router(pool_over(&mock));

        let response = router
            .oneshot(
                Request::delete("/v1/zones/zone-a/grids/grid-held")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let envelope = envelope_of(response).await;
        assert_eq!(envelope.status, ResponseStatus::Success);
        assert_eq!(envelope.deleted, Some(false));
        // The grid is back in the pool, unlocked.
        let kept = mock.instance("zone-a", "grid-held").unwrap();
        assert_eq!(kept.lock_holder(), keys::UNLOCKED);
    }

    #[tokio::test]
    async fn delete_no_rush_removes_the_grid() {
        let mock = MockCompute::new();
        mock.add_instance(running_grid("grid-doomed"));
        let router = crate::build_router(pool_over(&mock));

        let response = router
            .oneshot(
                Request::delete("/v1/zones/zone-a/grids/grid-doomed?noRush=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let envelope = envelope_of(response).await;
        assert_eq!(envelope.deleted, Some(true));
        assert!(mock.instance("zone-a", "grid-doomed").is_none());
    }

    #[tokio::test]
    async fn delete_missing_grid_is_a_404_failure_envelope() {
        let mock = MockCompute::new();
        let router = crate::build_router(pool_over(&mock));

        let response = router
            .oneshot(
                Request::delete("/v1/zones/zone-a/grids/grid-ghost?noRush=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let envelope = envelope_of(response).await;
        assert_eq!(envelope.status, ResponseStatus::Failure);
    }

    #[tokio::test]
    async fn healthz_answers() {
        let mock = MockCompute::new();
        let router = crate::build_router(pool_over(&mock));

        let response = router
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

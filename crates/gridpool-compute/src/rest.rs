//! REST implementation of [`ComputeBackend`].
//!
//! Thin JSON-over-HTTP client for the provider's zonal compute API.
//! Each method maps to exactly one request; transport and HTTP failures
//! are converted to [`ComputeError`] and surfaced without retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::backend::ComputeBackend;
use crate::error::{ComputeError, ComputeResult};
use crate::types::{Image, Instance, InstanceTemplate, Labels, Metadata, Operation};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Compute API client over reqwest.
#[derive(Clone)]
pub struct RestCompute {
    client: Client,
    base_url: String,
    project: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl RestCompute {
    pub fn new(base_url: &str, project: &str, token: Option<String>) -> ComputeResult<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ComputeError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn zonal_url(&self, zone: &str, tail: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{}",
            self.base_url, self.project, zone, tail
        )
    }

    fn global_url(&self, tail: &str) -> String {
        format!("{}/projects/{}/global/{}", self.base_url, self.project, tail)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send a request and decode the JSON body, mapping HTTP failures to
    /// the error taxonomy (404 ⇒ NotFound, 412 ⇒ PreconditionFailed).
    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> ComputeResult<T> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| ComputeError::Transport(format!("{what}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(%what, status = status.as_u16(), "backend call failed");
            return Err(match status {
                StatusCode::NOT_FOUND => ComputeError::NotFound(what.to_string()),
                StatusCode::PRECONDITION_FAILED => {
                    ComputeError::PreconditionFailed(format!("{what}: {body}"))
                }
                _ => ComputeError::Http {
                    status: status.as_u16(),
                    body,
                },
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| ComputeError::Decode(format!("{what}: {e}")))
    }

    /// Like [`Self::send`] but treats a 404 as `None`.
    async fn send_optional<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        what: &str,
    ) -> ComputeResult<Option<T>> {
        match self.send(req, what).await {
            Ok(value) => Ok(Some(value)),
            Err(ComputeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ComputeBackend for RestCompute {
    async fn get_instance(&self, zone: &str, name: &str) -> ComputeResult<Option<Instance>> {
        let url = self.zonal_url(zone, &format!("instances/{name}"));
        self.send_optional(self.client.get(&url), &format!("get instance {zone}/{name}"))
            .await
    }

    async fn list_instances(
        &self,
        zone: &str,
        filter: &str,
        max_results: u32,
    ) -> ComputeResult<Vec<Instance>> {
        let url = self.zonal_url(zone, "instances");
        let req = self
            .client
            .get(&url)
            .query(&[("filter", filter), ("maxResults", &max_results.to_string())]);
        let envelope: ListEnvelope<Instance> =
            self.send(req, &format!("list instances {zone}")).await?;
        Ok(envelope.items)
    }

    async fn insert_instance(
        &self,
        zone: &str,
        template: &InstanceTemplate,
    ) -> ComputeResult<Operation> {
        let url = self.zonal_url(zone, "instances");
        self.send(
            self.client.post(&url).json(template),
            &format!("insert instance {zone}/{}", template.name),
        )
        .await
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        let url = self.zonal_url(zone, &format!("instances/{name}"));
        self.send(
            self.client.delete(&url),
            &format!("delete instance {zone}/{name}"),
        )
        .await
    }

    async fn start_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        let url = self.zonal_url(zone, &format!("instances/{name}/start"));
        self.send(
            self.client.post(&url),
            &format!("start instance {zone}/{name}"),
        )
        .await
    }

    async fn stop_instance(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        let url = self.zonal_url(zone, &format!("instances/{name}/stop"));
        self.send(
            self.client.post(&url),
            &format!("stop instance {zone}/{name}"),
        )
        .await
    }

    async fn set_labels(
        &self,
        zone: &str,
        name: &str,
        labels: &Labels,
        fingerprint: &str,
    ) -> ComputeResult<Operation> {
        let url = self.zonal_url(zone, &format!("instances/{name}/setLabels"));
        let body = json!({ "labels": labels, "labelFingerprint": fingerprint });
        self.send(
            self.client.post(&url).json(&body),
            &format!("set labels {zone}/{name}"),
        )
        .await
    }

    async fn set_metadata(
        &self,
        zone: &str,
        name: &str,
        metadata: &Metadata,
        fingerprint: &str,
    ) -> ComputeResult<Operation> {
        let url = self.zonal_url(zone, &format!("instances/{name}/setMetadata"));
        let body = json!({ "metadata": metadata, "metadataFingerprint": fingerprint });
        self.send(
            self.client.post(&url).json(&body),
            &format!("set metadata {zone}/{name}"),
        )
        .await
    }

    async fn set_machine_type(
        &self,
        zone: &str,
        name: &str,
        machine_type: &str,
    ) -> ComputeResult<Operation> {
        let url = self.zonal_url(zone, &format!("instances/{name}/setMachineType"));
        let body = json!({ "machineType": machine_type });
        self.send(
            self.client.post(&url).json(&body),
            &format!("set machine type {zone}/{name}"),
        )
        .await
    }

    async fn set_service_account(
        &self,
        zone: &str,
        name: &str,
        email: &str,
    ) -> ComputeResult<Operation> {
        let url = self.zonal_url(zone, &format!("instances/{name}/setServiceAccount"));
        let body = json!({ "email": email });
        self.send(
            self.client.post(&url).json(&body),
            &format!("set service account {zone}/{name}"),
        )
        .await
    }

    async fn get_image_from_family(&self, family: &str) -> ComputeResult<Option<Image>> {
        let url = self.global_url(&format!("images/family/{family}"));
        self.send_optional(self.client.get(&url), &format!("get image family {family}"))
            .await
    }

    async fn list_images(&self, filter: &str, max_results: u32) -> ComputeResult<Vec<Image>> {
        let url = self.global_url("images");
        let req = self
            .client
            .get(&url)
            .query(&[("filter", filter), ("maxResults", &max_results.to_string())]);
        let envelope: ListEnvelope<Image> = self.send(req, "list images").await?;
        Ok(envelope.items)
    }

    async fn get_zone_operation(&self, zone: &str, name: &str) -> ComputeResult<Operation> {
        let url = self.zonal_url(zone, &format!("operations/{name}"));
        self.send(self.client.get(&url), &format!("get operation {zone}/{name}"))
            .await
    }
}

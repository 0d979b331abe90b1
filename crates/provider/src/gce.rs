// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GCE backend: billable VM instances via the Compute Engine REST API.
//!
//! One instance per agent, named after the agent id (the idempotency key —
//! an "already exists" insert resolves by lookup). The boot program rides
//! in the `startup-script` metadata slot and secret values ride as further
//! metadata items, readable only from the instance's local metadata
//! endpoint. Credentials live in Secret Manager, artifacts in GCS.

use crate::broker::Injection;
use crate::{
    CreatedResource, Provider, ProviderError, ResourceDescriptor, ResourceHealth, ResourceSpec,
    FLEET_ID_LABEL, FLEET_LABEL,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use fleet_core::{AgentId, Backend};
use serde_json::{json, Value};
use std::time::Duration;

const BOOT_IMAGE: &str = "projects/ubuntu-os-cloud/global/images/family/ubuntu-2204-lts";
const BOOT_DISK_GB: u32 = 50;
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Connection settings for one project/zone.
#[derive(Debug, Clone)]
pub struct GceConfig {
    pub project: String,
    pub zone: String,
    /// GCS bucket for workload artifacts.
    pub bucket: String,
    /// Service account email for created instances; `None` uses the
    /// project's default compute account.
    pub service_account: Option<String>,
    /// OAuth2 bearer token for all API calls.
    pub access_token: String,
    pub compute_base: String,
    pub secrets_base: String,
    pub storage_base: String,
    pub storage_upload_base: String,
    pub operation_poll_ms: u64,
    pub operation_attempts: usize,
}

impl GceConfig {
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        bucket: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            bucket: bucket.into(),
            service_account: None,
            access_token: access_token.into(),
            compute_base: "https://compute.googleapis.com/compute/v1".to_string(),
            secrets_base: "https://secretmanager.googleapis.com/v1".to_string(),
            storage_base: "https://storage.googleapis.com/storage/v1".to_string(),
            storage_upload_base: "https://storage.googleapis.com/upload/storage/v1".to_string(),
            operation_poll_ms: 2_000,
            operation_attempts: 150, // 150 * 2s = 300s, matching the zone-op budget
        }
    }
}

pub struct GceProvider {
    http: reqwest::Client,
    cfg: GceConfig,
}

impl GceProvider {
    pub fn new(cfg: GceConfig) -> Self {
        Self { http: reqwest::Client::new(), cfg }
    }

    fn zone_url(&self) -> String {
        format!("{}/projects/{}/zones/{}", self.cfg.compute_base, self.cfg.project, self.cfg.zone)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        req.bearer_auth(&self.cfg.access_token)
            .send()
            .await
            .map_err(|e| ProviderError::unavailable(format!("transport: {e}")))
    }

    /// Poll a zone operation until DONE or the attempt budget runs out.
    async fn wait_for_operation(&self, op_name: &str) -> Result<(), ProviderError> {
        let url = format!("{}/operations/{}", self.zone_url(), op_name);
        for i in 0..self.cfg.operation_attempts {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(self.cfg.operation_poll_ms)).await;
            }
            let resp = self.send(self.http.get(&url)).await?;
            let op: Value = read_json(resp).await?;
            if op.get("status").and_then(Value::as_str) == Some("DONE") {
                if let Some(err) = op.get("error").filter(|e| !e.is_null()) {
                    return Err(ProviderError::rejected(format!("operation failed: {err}")));
                }
                return Ok(());
            }
        }
        Err(ProviderError::unavailable(format!("operation {op_name} did not complete in time")))
    }

    async fn fetch_instance(&self, name: &str) -> Result<Option<Value>, ProviderError> {
        let url = format!("{}/instances/{}", self.zone_url(), name);
        let resp = self.send(self.http.get(&url)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(read_json(resp).await?))
    }

    /// Resolve metadata-injected handles to `(key, value)` pairs. Values
    /// cross this boundary only; they are never returned upward.
    async fn resolve_metadata_items(
        &self,
        spec: &ResourceSpec,
    ) -> Result<Vec<(String, String)>, ProviderError> {
        let mut items = Vec::with_capacity(spec.secrets.len());
        for handle in &spec.secrets {
            let Injection::MetadataItem { key } = &handle.injection else { continue };
            match self.get_secret(&handle.name).await? {
                Some(value) => items.push((key.clone(), value)),
                None if handle.required => {
                    return Err(ProviderError::rejected(format!(
                        "required credential vanished from store: {}",
                        handle.name
                    )));
                }
                None => {}
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl Provider for GceProvider {
    async fn create_resource(&self, spec: &ResourceSpec) -> Result<CreatedResource, ProviderError> {
        let name = spec.agent_id.to_string();
        let metadata_items = self.resolve_metadata_items(spec).await?;
        let body = instance_body(&self.cfg, spec, &metadata_items);

        let url = format!("{}/instances", self.zone_url());
        let resp = self.send(self.http.post(&url).json(&body)).await?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            // Instance already exists for this id: success by lookup.
            tracing::info!(instance = %name, "instance already exists, resolving by lookup");
            let existing = self
                .fetch_instance(&name)
                .await?
                .ok_or_else(|| ProviderError::unavailable("instance vanished during lookup"))?;
            return Ok(CreatedResource { resource_id: name, address: external_ip(&existing) });
        }
        if !resp.status().is_success() {
            return Err(error_from_status(resp).await);
        }

        let op: Value = read_json(resp).await?;
        let op_name = op
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::unavailable("insert returned no operation name"))?
            .to_string();

        // The insert was accepted: from here on, failures carry the
        // instance name so the orchestrator can tear it down.
        let result: Result<CreatedResource, ProviderError> = async {
            self.wait_for_operation(&op_name).await?;
            let instance = self
                .fetch_instance(&name)
                .await?
                .ok_or_else(|| ProviderError::unavailable("instance missing after create"))?;
            Ok(CreatedResource { resource_id: name.clone(), address: external_ip(&instance) })
        }
        .await;

        result.map_err(|e| e.with_partial(spec.agent_id.to_string()))
    }

    async fn delete_resource(&self, resource_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/instances/{}", self.zone_url(), resource_id);
        let resp = self.send(self.http.delete(&url)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(error_from_status(resp).await);
        }
        let op: Value = read_json(resp).await?;
        if let Some(op_name) = op.get("name").and_then(Value::as_str) {
            self.wait_for_operation(op_name).await?;
        }
        Ok(())
    }

    async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceDescriptor>, ProviderError> {
        Ok(self.fetch_instance(resource_id).await?.as_ref().map(descriptor_from_instance))
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError> {
        let url = format!("{}/instances", self.zone_url());
        let filter = format!("labels.{FLEET_LABEL}=true");
        let resp = self.send(self.http.get(&url).query(&[("filter", filter.as_str())])).await?;
        if !resp.status().is_success() {
            return Err(error_from_status(resp).await);
        }
        let body: Value = read_json(resp).await?;
        let items = body.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(items.iter().map(descriptor_from_instance).collect())
    }

    async fn get_secret(&self, name: &str) -> Result<Option<String>, ProviderError> {
        let url = format!(
            "{}/projects/{}/secrets/{}/versions/latest:access",
            self.cfg.secrets_base, self.cfg.project, name
        );
        let resp = self.send(self.http.get(&url)).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(error_from_status(resp).await);
        }
        let body: Value = read_json(resp).await?;
        let data = body
            .pointer("/payload/data")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::unavailable("secret version had no payload"))?;
        let bytes = B64
            .decode(data)
            .map_err(|e| ProviderError::unavailable(format!("secret payload not base64: {e}")))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| ProviderError::rejected("secret payload not utf-8"))
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), ProviderError> {
        let parent = format!("{}/projects/{}", self.cfg.secrets_base, self.cfg.project);
        let create_url = format!("{parent}/secrets");
        let resp = self
            .send(
                self.http
                    .post(&create_url)
                    .query(&[("secretId", name)])
                    .json(&json!({ "replication": { "automatic": {} } })),
            )
            .await?;
        // Already-existing secret just gets a new version.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::CONFLICT {
            return Err(error_from_status(resp).await);
        }

        let version_url = format!("{parent}/secrets/{name}:addVersion");
        let payload = json!({ "payload": { "data": B64.encode(value.as_bytes()) } });
        let resp = self.send(self.http.post(&version_url).json(&payload)).await?;
        if !resp.status().is_success() {
            return Err(error_from_status(resp).await);
        }
        Ok(())
    }

    async fn put_object(&self, path: &str, bytes: &[u8]) -> Result<String, ProviderError> {
        let url = format!("{}/b/{}/o", self.cfg.storage_upload_base, self.cfg.bucket);
        let resp = self
            .send(
                self.http
                    .post(&url)
                    .query(&[("uploadType", "media"), ("name", path)])
                    .body(bytes.to_vec()),
            )
            .await?;
        if !resp.status().is_success() {
            return Err(error_from_status(resp).await);
        }
        Ok(format!("gs://{}/{}", self.cfg.bucket, path))
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, ProviderError> {
        let url =
            format!("{}/b/{}/o/{}", self.cfg.storage_base, self.cfg.bucket, encode_object(path));
        let resp = self.send(self.http.get(&url).query(&[("alt", "media")])).await?;
        if !resp.status().is_success() {
            return Err(error_from_status(resp).await);
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ProviderError::unavailable(format!("object read: {e}")))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/b/{}/o", self.cfg.storage_base, self.cfg.bucket);
        let resp = self.send(self.http.get(&url).query(&[("prefix", prefix)])).await?;
        if !resp.status().is_success() {
            return Err(error_from_status(resp).await);
        }
        let body: Value = read_json(resp).await?;
        let items = body.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(|i| i.get("name").and_then(Value::as_str).map(String::from))
            .collect())
    }

    fn backend(&self) -> Backend {
        Backend::Gce
    }
}

/// Build the `instances.insert` request body.
///
/// Mirrors what we know works in production: Ubuntu 22.04 family image,
/// 50 GB auto-delete boot disk, default network with external NAT,
/// cloud-platform scoped service account, preemptible scheduling for spot.
pub(crate) fn instance_body(
    cfg: &GceConfig,
    spec: &ResourceSpec,
    metadata_items: &[(String, String)],
) -> Value {
    let mut items = vec![json!({ "key": "startup-script", "value": spec.boot_program })];
    for (key, value) in metadata_items {
        items.push(json!({ "key": key, "value": value }));
    }

    let mut labels = serde_json::Map::new();
    labels.insert(FLEET_LABEL.to_string(), json!("true"));
    labels.insert(FLEET_ID_LABEL.to_string(), json!(spec.agent_id.as_str()));

    let mut body = json!({
        "name": spec.agent_id.as_str(),
        "machineType": format!("zones/{}/machineTypes/{}", cfg.zone, spec.machine_class),
        "disks": [{
            "boot": true,
            "autoDelete": true,
            "initializeParams": {
                "sourceImage": BOOT_IMAGE,
                "diskSizeGb": BOOT_DISK_GB,
            },
        }],
        "networkInterfaces": [{
            "network": "global/networks/default",
            "accessConfigs": [{ "name": "External NAT", "type": "ONE_TO_ONE_NAT" }],
        }],
        "metadata": { "items": items },
        "serviceAccounts": [{
            "email": cfg.service_account.as_deref().unwrap_or("default"),
            "scopes": [CLOUD_PLATFORM_SCOPE],
        }],
        "labels": labels,
    });

    if spec.spot {
        body["scheduling"] = json!({ "preemptible": true, "automaticRestart": false });
    }
    body
}

/// First external NAT IP of an instance, if assigned.
pub(crate) fn external_ip(instance: &Value) -> Option<String> {
    instance
        .get("networkInterfaces")?
        .as_array()?
        .iter()
        .flat_map(|iface| {
            iface.get("accessConfigs").and_then(Value::as_array).into_iter().flatten()
        })
        .find_map(|ac| ac.get("natIP").and_then(Value::as_str))
        .map(String::from)
}

pub(crate) fn descriptor_from_instance(instance: &Value) -> ResourceDescriptor {
    let name =
        instance.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
    let agent_id = instance
        .pointer(&format!("/labels/{FLEET_ID_LABEL}"))
        .and_then(Value::as_str)
        .map(AgentId::from_string);
    let health = match instance.get("status").and_then(Value::as_str).unwrap_or_default() {
        "PROVISIONING" | "STAGING" => ResourceHealth::Provisioning,
        "STOPPING" | "SUSPENDING" | "SUSPENDED" | "TERMINATED" => ResourceHealth::Terminating,
        _ => ResourceHealth::Running,
    };
    ResourceDescriptor { resource_id: name, agent_id, health, address: external_ip(instance) }
}

/// Map an HTTP failure to the retryable/permanent split.
fn classify_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

async fn error_from_status(resp: reqwest::Response) -> ProviderError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let reason = format!("{status}: {}", body.chars().take(256).collect::<String>());
    if classify_status(status) {
        ProviderError::unavailable(reason)
    } else {
        ProviderError::rejected(reason)
    }
}

async fn read_json(resp: reqwest::Response) -> Result<Value, ProviderError> {
    resp.json().await.map_err(|e| ProviderError::unavailable(format!("malformed response: {e}")))
}

/// GCS object names go in a path segment, so slashes must be encoded.
fn encode_object(path: &str) -> String {
    path.replace('%', "%25").replace('/', "%2F").replace('+', "%2B").replace(' ', "%20")
}

#[cfg(test)]
#[path = "gce_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes backend: one pod per agent via the cluster API.
//!
//! Pods are named after the agent id and labelled
//! `app=fleet-agent, fleet-id=<id>`; the boot program runs as the container
//! command and credentials are injected as env vars sourced from a managed
//! cluster `Secret`. There is no bucket in this deployment shape, so the
//! object store is a directory on the daemon host.

use crate::broker::Injection;
use crate::{
    CreatedResource, Provider, ProviderError, ResourceDescriptor, ResourceHealth, ResourceSpec,
    FLEET_ID_LABEL, FLEET_LABEL,
};
use async_trait::async_trait;
use fleet_core::{AgentId, Backend};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, Pod, PodSpec, Secret as K8sSecret, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for one namespace.
#[derive(Debug, Clone)]
pub struct K8sConfig {
    pub namespace: String,
    /// Agent container image (bash + node + engine CLI preinstalled).
    pub image: String,
    /// Managed Secret holding credential key/value pairs.
    pub credential_secret: String,
    /// Daemon-local directory backing the object store.
    pub objects_dir: PathBuf,
    pub ready_poll_ms: u64,
    pub ready_attempts: usize,
}

impl K8sConfig {
    pub fn new(namespace: impl Into<String>, image: impl Into<String>, objects_dir: impl Into<PathBuf>) -> Self {
        Self {
            namespace: namespace.into(),
            image: image.into(),
            credential_secret: "fleet-credentials".to_string(),
            objects_dir: objects_dir.into(),
            ready_poll_ms: 500,
            ready_attempts: 120, // 120 * 500ms = 60s
        }
    }
}

pub struct ContainerProvider {
    pods: Api<Pod>,
    secrets: Api<K8sSecret>,
    cfg: K8sConfig,
}

impl ContainerProvider {
    /// Connect using the ambient kubeconfig / in-cluster environment.
    pub async fn connect(cfg: K8sConfig) -> Result<Self, ProviderError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ProviderError::unavailable(format!("kube client: {e}")))?;
        Ok(Self::with_client(client, cfg))
    }

    pub fn with_client(client: Client, cfg: K8sConfig) -> Self {
        let pods = Api::namespaced(client.clone(), &cfg.namespace);
        let secrets = Api::namespaced(client, &cfg.namespace);
        Self { pods, secrets, cfg }
    }

    /// Poll until the pod has an IP assigned.
    async fn wait_for_pod_ip(&self, name: &str) -> Result<String, ProviderError> {
        for i in 0..self.cfg.ready_attempts {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(self.cfg.ready_poll_ms)).await;
            }
            if let Ok(pod) = self.pods.get(name).await {
                if let Some(ip) = pod.status.as_ref().and_then(|s| s.pod_ip.as_ref()) {
                    if !ip.is_empty() {
                        tracing::info!(%name, %ip, attempt = i, "pod IP assigned");
                        return Ok(ip.clone());
                    }
                }
            }
        }
        Err(ProviderError::unavailable(format!(
            "pod {} did not receive IP within {}s",
            name,
            (self.cfg.ready_attempts as u64 * self.cfg.ready_poll_ms) / 1000
        )))
    }

    fn object_path(&self, path: &str) -> Result<PathBuf, ProviderError> {
        resolve_object_path(&self.cfg.objects_dir, path)
    }
}

#[async_trait]
impl Provider for ContainerProvider {
    async fn create_resource(&self, spec: &ResourceSpec) -> Result<CreatedResource, ProviderError> {
        let name = spec.agent_id.to_string();
        let pod = build_pod(&self.cfg, spec);

        match self.pods.create(&PostParams::default(), &pod).await {
            Ok(_) => {}
            // Pod already exists for this id: success by lookup below.
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                tracing::info!(pod = %name, "pod already exists, resolving by lookup");
            }
            Err(e) => return Err(map_kube(e)),
        }

        // The pod exists now; any later failure carries its id for cleanup.
        let ip = self.wait_for_pod_ip(&name).await.map_err(|e| e.with_partial(name.clone()))?;
        Ok(CreatedResource { resource_id: name, address: Some(ip) })
    }

    async fn delete_resource(&self, resource_id: &str) -> Result<(), ProviderError> {
        match self.pods.delete(resource_id, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(map_kube(e)),
        }
    }

    async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceDescriptor>, ProviderError> {
        match self.pods.get_opt(resource_id).await {
            Ok(pod) => Ok(pod.as_ref().map(descriptor_from_pod)),
            Err(e) => Err(map_kube(e)),
        }
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError> {
        let lp = ListParams::default().labels(&format!("app={FLEET_LABEL}"));
        let pods = self.pods.list(&lp).await.map_err(map_kube)?;
        Ok(pods.iter().map(descriptor_from_pod).collect())
    }

    async fn get_secret(&self, name: &str) -> Result<Option<String>, ProviderError> {
        let secret = match self.secrets.get_opt(&self.cfg.credential_secret).await {
            Ok(s) => s,
            Err(e) => return Err(map_kube(e)),
        };
        let Some(secret) = secret else { return Ok(None) };
        let Some(data) = secret.data else { return Ok(None) };
        match data.get(name) {
            Some(ByteString(bytes)) => String::from_utf8(bytes.clone())
                .map(Some)
                .map_err(|_| ProviderError::rejected(format!("credential {name} not utf-8"))),
            None => Ok(None),
        }
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), ProviderError> {
        let exists = self
            .secrets
            .get_opt(&self.cfg.credential_secret)
            .await
            .map_err(map_kube)?
            .is_some();

        if exists {
            let patch = serde_json::json!({ "stringData": { name: value } });
            self.secrets
                .patch(
                    &self.cfg.credential_secret,
                    &PatchParams::default(),
                    &Patch::Merge(&patch),
                )
                .await
                .map_err(map_kube)?;
        } else {
            let mut string_data = BTreeMap::new();
            string_data.insert(name.to_string(), value.to_string());
            let secret = K8sSecret {
                metadata: ObjectMeta {
                    name: Some(self.cfg.credential_secret.clone()),
                    namespace: Some(self.cfg.namespace.clone()),
                    ..Default::default()
                },
                string_data: Some(string_data),
                ..Default::default()
            };
            self.secrets.create(&PostParams::default(), &secret).await.map_err(map_kube)?;
        }
        Ok(())
    }

    async fn put_object(&self, path: &str, bytes: &[u8]) -> Result<String, ProviderError> {
        let full = self.object_path(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(fs_err)?;
        }
        std::fs::write(&full, bytes).map_err(fs_err)?;
        Ok(full.display().to_string())
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, ProviderError> {
        let full = self.object_path(path)?;
        if !full.exists() {
            return Err(ProviderError::rejected(format!("no such object: {path}")));
        }
        std::fs::read(&full).map_err(fs_err)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ProviderError> {
        let mut paths = Vec::new();
        collect_objects(&self.cfg.objects_dir, &self.cfg.objects_dir, &mut paths)?;
        paths.retain(|p| p.starts_with(prefix));
        paths.sort();
        Ok(paths)
    }

    fn backend(&self) -> Backend {
        Backend::Kubernetes
    }
}

/// Build the Pod for one agent. Pure so tests can inspect the spec.
pub(crate) fn build_pod(cfg: &K8sConfig, spec: &ResourceSpec) -> Pod {
    let mut env = Vec::new();
    for handle in &spec.secrets {
        let Injection::EnvVar { name } = &handle.injection else { continue };
        env.push(EnvVar {
            name: name.clone(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: cfg.credential_secret.clone(),
                    key: handle.name.clone(),
                    optional: Some(!handle.required),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let container = Container {
        name: "agent".to_string(),
        image: Some(cfg.image.clone()),
        command: Some(vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            spec.boot_program.clone(),
        ]),
        env: Some(env),
        ..Default::default()
    };

    let labels: BTreeMap<String, String> = [
        ("app".to_string(), FLEET_LABEL.to_string()),
        (FLEET_ID_LABEL.to_string(), spec.agent_id.to_string()),
    ]
    .into_iter()
    .collect();

    let annotations: BTreeMap<String, String> =
        [("fleet.dev/machine-class".to_string(), spec.machine_class.clone())]
            .into_iter()
            .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.agent_id.to_string()),
            namespace: Some(cfg.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn descriptor_from_pod(pod: &Pod) -> ResourceDescriptor {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let agent_id = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(FLEET_ID_LABEL))
        .map(|s| AgentId::from_string(s));

    let health = if pod.metadata.deletion_timestamp.is_some() {
        ResourceHealth::Terminating
    } else {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") => ResourceHealth::Provisioning,
            Some("Succeeded") | Some("Failed") => ResourceHealth::Terminating,
            _ => ResourceHealth::Running,
        }
    };

    let address = pod.status.as_ref().and_then(|s| s.pod_ip.clone());
    ResourceDescriptor { resource_id: name, agent_id, health, address }
}

fn map_kube(e: kube::Error) -> ProviderError {
    match e {
        kube::Error::Api(ae) if ae.code < 500 && ae.code != 429 => {
            ProviderError::rejected(format!("{}: {}", ae.code, ae.message))
        }
        other => ProviderError::unavailable(other.to_string()),
    }
}

fn fs_err(e: std::io::Error) -> ProviderError {
    ProviderError::unavailable(format!("object store io: {e}"))
}

/// Keys are forward-slash paths; reject escapes from the store root.
pub(crate) fn resolve_object_path(root: &Path, path: &str) -> Result<PathBuf, ProviderError> {
    if path.is_empty() || path.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return Err(ProviderError::rejected(format!("invalid object path: {path}")));
    }
    Ok(root.join(path))
}

pub(crate) fn collect_objects(
    root: &Path,
    dir: &Path,
    out: &mut Vec<String>,
) -> Result<(), ProviderError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).map_err(fs_err)? {
        let entry = entry.map_err(fs_err)?;
        let path = entry.path();
        if path.is_dir() {
            collect_objects(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "k8s_tests.rs"]
mod tests;

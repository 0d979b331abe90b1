// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration.
//!
//! Loaded from `<state_dir>/config.toml`, all fields optional with
//! defaults; a handful of operational knobs can be overridden through the
//! environment (see [`crate::env`]). Credential *values* never appear here,
//! only the names to resolve through the provider's store.

use fleet_core::Backend;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Name of the stored credential whose value authenticates workload
/// heartbeats. Always part of the required set.
pub const AUTH_SECRET: &str = "fleet-auth-token";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("backend '{0}' requires a [{0}] config section")]
    MissingBackendSection(Backend),
}

/// GCE backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GceSettings {
    pub project: String,
    pub zone: String,
    /// GCS bucket for workload artifacts.
    pub bucket: String,
    #[serde(default)]
    pub service_account: Option<String>,
    /// OAuth2 bearer token for the Google REST APIs. Typically supplied by
    /// the environment of the service account running the daemon.
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Kubernetes backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct K8sSettings {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_image")]
    pub image: String,
    /// Local directory for workload artifacts; defaults to
    /// `<state_dir>/objects`.
    #[serde(default)]
    pub objects_dir: Option<PathBuf>,
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_dir: PathBuf,
    pub registry_dir: PathBuf,

    pub backend: Backend,
    /// Reconciler cadence.
    pub poll_interval_ms: u64,
    /// A live agent with no heartbeat inside this window is labelled
    /// unresponsive in views.
    pub heartbeat_grace_ms: u64,
    /// How long a `Pending` record may sit unresolved before the
    /// reconciler fails it.
    pub create_grace_ms: u64,
    /// Transient create failures retried this many times before failing
    /// the record.
    pub create_retries: u32,
    /// Base delay for exponential create backoff.
    pub retry_base_ms: u64,
    /// Outer deadline on individual provider calls.
    pub provider_timeout_ms: u64,

    /// Credential names the broker must resolve for every agent.
    pub required_secrets: Vec<String>,
    /// Credential names injected when present, skipped when absent.
    pub optional_secrets: Vec<String>,
    /// Heartbeat endpoint baked into boot scripts; empty disables
    /// workload reporting.
    pub control_plane_url: String,

    pub gce: Option<GceSettings>,
    pub k8s: Option<K8sSettings>,
}

/// On-disk shape of `config.toml`; everything optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    backend: Option<Backend>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    heartbeat_grace_ms: Option<u64>,
    #[serde(default)]
    create_grace_ms: Option<u64>,
    #[serde(default)]
    create_retries: Option<u32>,
    #[serde(default)]
    retry_base_ms: Option<u64>,
    #[serde(default)]
    provider_timeout_ms: Option<u64>,
    #[serde(default)]
    required_secrets: Option<Vec<String>>,
    #[serde(default)]
    optional_secrets: Option<Vec<String>>,
    #[serde(default)]
    control_plane_url: Option<String>,
    #[serde(default)]
    gce: Option<GceSettings>,
    #[serde(default)]
    k8s: Option<K8sSettings>,
}

impl Config {
    /// Load `<state_dir>/config.toml` (absent file means all defaults) and
    /// apply environment overrides.
    pub fn load(state_dir: PathBuf) -> Result<Self, ConfigError> {
        let path = state_dir.join("config.toml");
        let file: FileConfig = if path.exists() {
            toml::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            FileConfig::default()
        };
        Self::from_file(state_dir, file)
    }

    fn from_file(state_dir: PathBuf, file: FileConfig) -> Result<Self, ConfigError> {
        let backend = file.backend.unwrap_or(Backend::Gce);
        match backend {
            Backend::Gce if file.gce.is_none() => {
                return Err(ConfigError::MissingBackendSection(backend));
            }
            Backend::Kubernetes if file.k8s.is_none() => {
                return Err(ConfigError::MissingBackendSection(backend));
            }
            _ => {}
        }

        let mut required =
            file.required_secrets.unwrap_or_else(|| vec!["anthropic-api-key".to_string()]);
        // The heartbeat auth credential is always resolved so the boot
        // script can authenticate its reports.
        if !required.iter().any(|n| n == AUTH_SECRET) {
            required.push(AUTH_SECRET.to_string());
        }

        let poll_interval_ms = crate::env::poll_interval_override()
            .map(|d| d.as_millis() as u64)
            .or(file.poll_interval_ms)
            .unwrap_or(15_000);

        Ok(Self {
            socket_path: state_dir.join("fleetd.sock"),
            lock_path: state_dir.join("fleetd.lock"),
            log_dir: state_dir.join("logs"),
            registry_dir: state_dir.join("registry"),
            state_dir,
            backend,
            poll_interval_ms,
            heartbeat_grace_ms: file.heartbeat_grace_ms.unwrap_or(600_000),
            create_grace_ms: file.create_grace_ms.unwrap_or(300_000),
            create_retries: file.create_retries.unwrap_or(3),
            retry_base_ms: file.retry_base_ms.unwrap_or(500),
            provider_timeout_ms: file.provider_timeout_ms.unwrap_or(120_000),
            required_secrets: required,
            optional_secrets: file
                .optional_secrets
                .unwrap_or_else(|| vec!["github-token".to_string()]),
            control_plane_url: file.control_plane_url.unwrap_or_default(),
            gce: file.gce,
            k8s: file.k8s,
        })
    }

    /// Objects directory for the Kubernetes backend's filesystem store.
    pub fn objects_dir(&self) -> PathBuf {
        self.k8s
            .as_ref()
            .and_then(|k| k.objects_dir.clone())
            .unwrap_or_else(|| self.state_dir.join("objects"))
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_image() -> String {
    "ubuntu:22.04".to_string()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fleet-provider: backend abstraction for agent compute resources.
//!
//! The [`Provider`] trait covers everything the orchestrator needs from a
//! backend: resource lifecycle (create/get/delete/list, scoped to
//! fleet-labelled resources), a credential store, and an object store for
//! workload artifacts. Two implementations ship here:
//!
//! - [`GceProvider`] — billable VMs via the Compute Engine REST API, boot
//!   program in the `startup-script` metadata slot, Secret Manager for
//!   credentials, GCS for objects.
//! - [`ContainerProvider`] — Kubernetes pods via `kube`, boot program as
//!   the container command, credentials injected from a managed Secret,
//!   objects on the daemon's local filesystem.
//!
//! The [`broker::SecretBroker`] and [`bootscript`] generator sit alongside
//! because both are provider-facing: the broker turns credential names into
//! backend injection references, and the boot script consumes those
//! references on the remote side.

pub mod bootscript;
pub mod broker;
mod gce;
mod k8s;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeProvider, ProviderCall};

pub use broker::{Injection, SecretBroker, SecretHandle};
pub use gce::{GceConfig, GceProvider};
pub use k8s::{ContainerProvider, K8sConfig};

use async_trait::async_trait;
use fleet_core::{AgentId, Backend};
use thiserror::Error;

/// Label present on every resource this system creates. Listing is always
/// filtered by it so unrelated resources in the same project/namespace are
/// invisible to the orchestrator.
pub const FLEET_LABEL: &str = "fleet-agent";

/// Label carrying the owning agent id.
pub const FLEET_ID_LABEL: &str = "fleet-id";

/// Errors from provider operations.
///
/// Both variants carry an optional `partial_resource`: when a create fails
/// after the backend already allocated something, the id travels back so
/// the orchestrator can tear it down instead of leaking it.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Transient: safe to retry with backoff.
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String, partial_resource: Option<String> },
    /// Permanent: the request itself is bad (quota, validation, auth).
    #[error("backend rejected request: {reason}")]
    Rejected { reason: String, partial_resource: Option<String> },
}

impl ProviderError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into(), partial_resource: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected { reason: reason.into(), partial_resource: None }
    }

    /// Attach the id of a half-created resource to the error.
    pub fn with_partial(self, resource_id: impl Into<String>) -> Self {
        match self {
            Self::Unavailable { reason, .. } => {
                Self::Unavailable { reason, partial_resource: Some(resource_id.into()) }
            }
            Self::Rejected { reason, .. } => {
                Self::Rejected { reason, partial_resource: Some(resource_id.into()) }
            }
        }
    }

    pub fn partial_resource(&self) -> Option<&str> {
        match self {
            Self::Unavailable { partial_resource, .. } | Self::Rejected { partial_resource, .. } => {
                partial_resource.as_deref()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Everything a backend needs to realize one agent's resource.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    /// Idempotency key: both backends name the resource after it and carry
    /// it in the `fleet-id` label.
    pub agent_id: AgentId,
    /// VM shape / pod size hint.
    pub machine_class: String,
    /// Preemptible capacity where supported.
    pub spot: bool,
    /// Boot program emitted by the boot script generator. GCE puts it in
    /// the `startup-script` metadata slot; Kubernetes runs it as the
    /// container command.
    pub boot_program: String,
    /// Injection references resolved by the secret broker. Raw values are
    /// fetched only inside `create_resource`.
    pub secrets: Vec<SecretHandle>,
}

/// Result of a successful `create_resource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    pub resource_id: String,
    /// Reachable endpoint, when the backend knows it at creation time.
    pub address: Option<String>,
}

/// Backend-reported coarse health of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceHealth {
    Provisioning,
    Running,
    Terminating,
}

/// Point-in-time view of one fleet-labelled resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub resource_id: String,
    /// Owning agent, parsed from the `fleet-id` label when present.
    pub agent_id: Option<AgentId>,
    pub health: ResourceHealth,
    pub address: Option<String>,
}

/// Backend abstraction for agent compute, credentials, and artifacts.
///
/// Contract notes:
/// - `create_resource` is idempotent per agent id: an "already exists"
///   response resolves to the existing resource, never an error.
/// - `delete_resource` of an absent resource is `Ok(())`.
/// - `get_resource` of an absent resource is `Ok(None)`; errors are
///   reserved for not-knowing.
/// - `list_resources` returns only fleet-labelled resources.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    async fn create_resource(&self, spec: &ResourceSpec) -> Result<CreatedResource, ProviderError>;

    async fn delete_resource(&self, resource_id: &str) -> Result<(), ProviderError>;

    async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceDescriptor>, ProviderError>;

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError>;

    /// Latest value of a named credential, `None` when absent.
    async fn get_secret(&self, name: &str) -> Result<Option<String>, ProviderError>;

    /// Create or update a named credential.
    async fn set_secret(&self, name: &str, value: &str) -> Result<(), ProviderError>;

    /// Store an artifact; returns the backend's path/URL for it.
    async fn put_object(&self, path: &str, bytes: &[u8]) -> Result<String, ProviderError>;

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, ProviderError>;

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ProviderError>;

    fn backend(&self) -> Backend;
}

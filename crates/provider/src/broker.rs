// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret broker: credential names in, injection references out.
//!
//! The orchestrator never sees credential values. `resolve` verifies each
//! named credential exists in the provider's store and hands back a
//! [`SecretHandle`] describing how the backend will inject it — a metadata
//! key for VMs, an env var name for pods. Values cross the wire only inside
//! the provider's `create_resource` boundary and are never logged.

use crate::{Provider, ProviderError};
use fleet_core::Backend;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("secret not found in credential store: {0}")]
    Missing(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// How the remote workload reads one injected credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    /// Instance metadata item, read via the local-only metadata endpoint.
    MetadataItem { key: String },
    /// Environment variable sourced from a managed Kubernetes Secret.
    EnvVar { name: String },
}

/// Reference to a stored credential plus its injection slot. Carries no
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretHandle {
    /// Name in the provider's credential store.
    pub name: String,
    /// Missing required handles make the boot script fail fast with a
    /// `failed` heartbeat instead of running the task without credentials.
    pub required: bool,
    pub injection: Injection,
}

impl SecretHandle {
    /// Build the injection reference a backend uses for `name`.
    pub fn for_backend(name: impl Into<String>, required: bool, backend: Backend) -> Self {
        let name = name.into();
        let injection = match backend {
            Backend::Gce => Injection::MetadataItem { key: metadata_key(&name) },
            Backend::Kubernetes => Injection::EnvVar { name: env_var_name(&name) },
        };
        Self { name, required, injection }
    }
}

/// Metadata keys are lowercase kebab, matching the store's naming.
fn metadata_key(name: &str) -> String {
    name.to_ascii_lowercase().replace('_', "-")
}

/// Env vars are SCREAMING_SNAKE.
fn env_var_name(name: &str) -> String {
    name.to_ascii_uppercase().replace('-', "_")
}

/// Verifies credentials exist and produces injection handles.
#[derive(Debug, Clone, Default)]
pub struct SecretBroker;

impl SecretBroker {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `names` against the provider's credential store.
    ///
    /// Fails on the first missing required credential; optional ones that
    /// are absent are silently dropped from the handle list.
    pub async fn resolve<P: Provider + ?Sized>(
        &self,
        provider: &P,
        required: &[String],
        optional: &[String],
    ) -> Result<Vec<SecretHandle>, BrokerError> {
        let backend = provider.backend();
        let mut handles = Vec::with_capacity(required.len() + optional.len());

        for name in required {
            if provider.get_secret(name).await?.is_none() {
                return Err(BrokerError::Missing(name.clone()));
            }
            handles.push(SecretHandle::for_backend(name, true, backend));
        }
        for name in optional {
            if provider.get_secret(name).await?.is_some() {
                handles.push(SecretHandle::for_backend(name, false, backend));
            } else {
                tracing::debug!(secret = %name, "optional credential absent, skipping");
            }
        }
        Ok(handles)
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;

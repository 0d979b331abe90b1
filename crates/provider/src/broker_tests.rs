// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::FakeProvider;
use fleet_core::Backend;

#[tokio::test]
async fn resolve_returns_metadata_handles_for_gce() {
    let provider = FakeProvider::new(Backend::Gce);
    provider.set_secret("anthropic_api_key", "sk-test").await.unwrap();

    let handles = SecretBroker::new()
        .resolve(&provider, &["anthropic_api_key".to_string()], &[])
        .await
        .unwrap();

    assert_eq!(handles.len(), 1);
    assert!(handles[0].required);
    assert_eq!(
        handles[0].injection,
        Injection::MetadataItem { key: "anthropic-api-key".to_string() }
    );
}

#[tokio::test]
async fn resolve_returns_env_handles_for_kubernetes() {
    let provider = FakeProvider::new(Backend::Kubernetes);
    provider.set_secret("github-token", "ghp_x").await.unwrap();

    let handles = SecretBroker::new()
        .resolve(&provider, &["github-token".to_string()], &[])
        .await
        .unwrap();

    assert_eq!(handles[0].injection, Injection::EnvVar { name: "GITHUB_TOKEN".to_string() });
}

#[tokio::test]
async fn missing_required_credential_fails() {
    let provider = FakeProvider::new(Backend::Gce);
    let err = SecretBroker::new()
        .resolve(&provider, &["anthropic-api-key".to_string()], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Missing(name) if name == "anthropic-api-key"));
}

#[tokio::test]
async fn missing_optional_credential_is_dropped() {
    let provider = FakeProvider::new(Backend::Gce);
    provider.set_secret("anthropic-api-key", "sk").await.unwrap();

    let handles = SecretBroker::new()
        .resolve(
            &provider,
            &["anthropic-api-key".to_string()],
            &["github-token".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].name, "anthropic-api-key");
}

#[test]
fn handles_never_carry_values() {
    // SecretHandle has no value field by construction; this pins the
    // debug representation so one can't sneak in via a later refactor.
    let handle = SecretHandle::for_backend("anthropic-api-key", true, Backend::Gce);
    let debug = format!("{handle:?}");
    assert!(!debug.contains("sk-"));
    assert!(debug.contains("anthropic-api-key"));
}

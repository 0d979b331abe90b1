// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fleet_core::Engine;

#[test]
fn requests_tag_by_type() {
    let json = serde_json::to_value(Request::Ping).unwrap();
    assert_eq!(json["type"], "Ping");

    let json = serde_json::to_value(Request::StopAgent { id: "agt-1".into() }).unwrap();
    assert_eq!(json["type"], "StopAgent");
    assert_eq!(json["id"], "agt-1");
}

#[test]
fn create_agent_defaults_are_omitted() {
    let request =
        Request::CreateAgent { id: None, task: TaskSpec::new("build the thing"), backend: None };
    let json = serde_json::to_value(&request).unwrap();
    assert!(json.get("id").is_none());
    assert!(json.get("backend").is_none());

    // Minimal wire form parses back with defaults.
    let parsed: Request = serde_json::from_value(serde_json::json!({
        "type": "CreateAgent",
        "task": { "prompt": "build the thing" },
    }))
    .unwrap();
    match parsed {
        Request::CreateAgent { id, task, backend } => {
            assert!(id.is_none());
            assert!(backend.is_none());
            assert_eq!(task.prompt, "build the thing");
            assert_eq!(task.engine, Engine::Claude);
            assert_eq!(task.timeout_secs, 14_400);
        }
        other => panic!("unexpected request: {other:?}"),
    }
}

#[test]
fn heartbeat_statuses_are_snake_case() {
    let request = Request::Heartbeat {
        id: "agt-1".into(),
        status: HeartbeatStatus::Completed,
        message: Some("done".to_string()),
    };
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["status"], "completed");

    let parsed: Request = serde_json::from_value(serde_json::json!({
        "type": "Heartbeat",
        "id": "agt-1",
        "status": "failed",
    }))
    .unwrap();
    match parsed {
        Request::Heartbeat { status, message, .. } => {
            assert_eq!(status, HeartbeatStatus::Failed);
            assert!(message.is_none());
        }
        other => panic!("unexpected request: {other:?}"),
    }
}

#[test]
fn list_agents_status_filter_roundtrips() {
    let parsed: Request = serde_json::from_value(serde_json::json!({
        "type": "ListAgents",
        "status": "running",
    }))
    .unwrap();
    assert_eq!(parsed, Request::ListAgents { status: Some(AgentStatus::Running) });

    let parsed: Request =
        serde_json::from_value(serde_json::json!({ "type": "ListAgents" })).unwrap();
    assert_eq!(parsed, Request::ListAgents { status: None });
}

#[test]
fn hello_token_is_optional() {
    let parsed: Request = serde_json::from_value(serde_json::json!({
        "type": "Hello",
        "version": "0.1.0",
    }))
    .unwrap();
    assert_eq!(parsed, Request::Hello { version: "0.1.0".to_string(), token: None });
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fleet_core::{Backend, TaskSpec};
use tempfile::TempDir;
use yare::parameterized;

fn registry() -> (TempDir, Registry) {
    let dir = TempDir::new().unwrap();
    let registry = Registry::open(dir.path()).unwrap();
    (dir, registry)
}

fn record(now_ms: u64) -> AgentRecord {
    AgentRecord::new(AgentId::new(), Backend::Gce, TaskSpec::new("build the thing"), now_ms)
}

#[test]
fn insert_and_get() {
    let (_dir, reg) = registry();
    let rec = record(100);
    let id = rec.id.clone();
    reg.insert(rec.clone()).unwrap();
    assert_eq!(reg.get(&id), Some(rec));
}

#[test]
fn insert_duplicate_is_rejected() {
    let (_dir, reg) = registry();
    let rec = record(100);
    reg.insert(rec.clone()).unwrap();
    assert!(matches!(reg.insert(rec), Err(RegistryError::AlreadyExists(_))));
}

#[test]
fn reopen_restores_records() {
    let dir = TempDir::new().unwrap();
    let rec = record(100);
    let id = rec.id.clone();
    {
        let reg = Registry::open(dir.path()).unwrap();
        reg.insert(rec.clone()).unwrap();
    }
    let reg = Registry::open(dir.path()).unwrap();
    assert_eq!(reg.get(&id), Some(rec));
}

#[test]
fn persist_keeps_previous_snapshot_as_bak() {
    let dir = TempDir::new().unwrap();
    let reg = Registry::open(dir.path()).unwrap();
    reg.insert(record(1)).unwrap();
    reg.insert(record(2)).unwrap();
    assert!(dir.path().join("agents.json").exists());
    assert!(dir.path().join("agents.json.bak").exists());
    assert!(!dir.path().join("agents.json.tmp").exists());
}

#[test]
fn list_filters_by_status_and_sorts_newest_first() {
    let (_dir, reg) = registry();
    let old = record(100);
    let new = record(200);
    reg.insert(old.clone()).unwrap();
    reg.insert(new.clone()).unwrap();
    reg.transition(&old.id, &[AgentStatus::Pending], AgentStatus::Failed, |_| {}).unwrap();

    let all = reg.list(None);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, new.id);

    let failed = reg.list(Some(AgentStatus::Failed));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, old.id);
}

#[test]
fn list_active_excludes_terminal() {
    let (_dir, reg) = registry();
    let a = record(1);
    let b = record(2);
    reg.insert(a.clone()).unwrap();
    reg.insert(b.clone()).unwrap();
    reg.transition(&a.id, &[AgentStatus::Pending], AgentStatus::Failed, |_| {}).unwrap();

    let active = reg.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, b.id);
}

#[test]
fn transition_applies_mutation_before_persisting() {
    let (_dir, reg) = registry();
    let rec = record(100);
    let id = rec.id.clone();
    reg.insert(rec).unwrap();

    let updated = reg
        .transition(&id, &[AgentStatus::Pending], AgentStatus::Starting, |r| {
            r.resource_id = Some("vm-1".into());
        })
        .unwrap();
    assert_eq!(updated.status, AgentStatus::Starting);
    assert_eq!(updated.resource_id.as_deref(), Some("vm-1"));
    assert_eq!(reg.get(&id).unwrap(), updated);
}

#[test]
fn transition_rejects_unexpected_status() {
    let (_dir, reg) = registry();
    let rec = record(100);
    let id = rec.id.clone();
    reg.insert(rec).unwrap();

    let err = reg
        .transition(&id, &[AgentStatus::Running], AgentStatus::Stopping, |_| {})
        .unwrap_err();
    assert!(matches!(err, RegistryError::StatusMismatch { .. }));
    // Record untouched.
    assert_eq!(reg.get(&id).unwrap().status, AgentStatus::Pending);
}

#[parameterized(
    pending_to_running = { AgentStatus::Pending, AgentStatus::Running },
    pending_to_stopped = { AgentStatus::Pending, AgentStatus::Stopped },
    stopping_to_running = { AgentStatus::Stopping, AgentStatus::Running },
)]
fn transition_rejects_edges_outside_graph(from: AgentStatus, to: AgentStatus) {
    let (_dir, reg) = registry();
    let mut rec = record(100);
    rec.status = from;
    let id = rec.id.clone();
    reg.upsert(rec).unwrap();

    let err = reg.transition(&id, &[from], to, |_| {}).unwrap_err();
    assert!(matches!(err, RegistryError::IllegalTransition { .. }));
}

#[test]
fn transition_unknown_id_is_not_found() {
    let (_dir, reg) = registry();
    let err = reg
        .transition(&AgentId::new(), &[AgentStatus::Pending], AgentStatus::Starting, |_| {})
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
}

#[test]
fn update_mutates_without_status_check() {
    let (_dir, reg) = registry();
    let rec = record(100);
    let id = rec.id.clone();
    reg.insert(rec).unwrap();

    let updated = reg.update(&id, |r| r.last_heartbeat_ms = Some(500)).unwrap();
    assert_eq!(updated.last_heartbeat_ms, Some(500));
    assert_eq!(reg.get(&id).unwrap().last_heartbeat_ms, Some(500));
}

#[test]
fn remove_deletes_record_and_log() {
    let (dir, reg) = registry();
    let rec = record(100);
    let id = rec.id.clone();
    reg.insert(rec).unwrap();
    reg.append_instruction(&id, "hello", 1).unwrap();
    assert!(dir.path().join("log").join(format!("{id}.jsonl")).exists());

    reg.remove(&id).unwrap();
    assert!(reg.get(&id).is_none());
    assert!(!dir.path().join("log").join(format!("{id}.jsonl")).exists());
    assert!(matches!(reg.remove(&id), Err(RegistryError::NotFound(_))));
}

#[test]
fn instruction_seqs_are_monotonic() {
    let (_dir, reg) = registry();
    let rec = record(100);
    let id = rec.id.clone();
    reg.insert(rec).unwrap();

    assert_eq!(reg.append_instruction(&id, "one", 1).unwrap(), 1);
    reg.record_heartbeat(&id, HeartbeatStatus::Running, None, 2).unwrap();
    assert_eq!(reg.append_instruction(&id, "two", 3).unwrap(), 3);
}

#[test]
fn mark_delivered_updates_view() {
    let (_dir, reg) = registry();
    let rec = record(100);
    let id = rec.id.clone();
    reg.insert(rec).unwrap();

    let seq = reg.append_instruction(&id, "fix the bug", 1).unwrap();
    assert!(!reg.instructions(&id).unwrap()[0].delivered);
    reg.mark_delivered(&id, seq, 2).unwrap();
    assert!(reg.instructions(&id).unwrap()[0].delivered);
}

#[test]
fn log_methods_require_known_agent() {
    let (_dir, reg) = registry();
    let id = AgentId::new();
    assert!(matches!(reg.append_instruction(&id, "x", 1), Err(RegistryError::NotFound(_))));
    assert!(matches!(reg.instructions(&id), Err(RegistryError::NotFound(_))));
    assert!(matches!(
        reg.record_heartbeat(&id, HeartbeatStatus::Running, None, 1),
        Err(RegistryError::NotFound(_))
    ));
}

#[test]
fn history_includes_heartbeats() {
    let (_dir, reg) = registry();
    let rec = record(100);
    let id = rec.id.clone();
    reg.insert(rec).unwrap();

    reg.append_instruction(&id, "x", 1).unwrap();
    reg.record_heartbeat(&id, HeartbeatStatus::Completed, Some("done".into()), 2).unwrap();

    let history = reg.history(&id).unwrap();
    assert_eq!(history.len(), 2);
    assert!(matches!(history[1], LogEntry::Heartbeat { status: HeartbeatStatus::Completed, .. }));
}

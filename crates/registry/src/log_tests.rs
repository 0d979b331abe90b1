// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fleet_core::{AgentId, HeartbeatStatus};
use std::fs;
use tempfile::TempDir;

fn setup() -> (TempDir, AgentId) {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("log")).unwrap();
    (dir, AgentId::new())
}

#[test]
fn read_missing_log_is_empty() {
    let (dir, id) = setup();
    assert!(read_all(dir.path(), &id).unwrap().is_empty());
    assert_eq!(last_seq(dir.path(), &id).unwrap(), 0);
}

#[test]
fn append_then_read_roundtrips() {
    let (dir, id) = setup();
    let entry = LogEntry::Instruction { seq: 1, text: "add tests".into(), at_ms: 10 };
    append(dir.path(), &id, &entry).unwrap();
    append(dir.path(), &id, &LogEntry::Delivered { seq: 1, at_ms: 20 }).unwrap();

    let entries = read_all(dir.path(), &id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], entry);
    assert_eq!(last_seq(dir.path(), &id).unwrap(), 1);
}

#[test]
fn seq_counts_across_entry_kinds() {
    let (dir, id) = setup();
    append(dir.path(), &id, &LogEntry::Instruction { seq: 1, text: "a".into(), at_ms: 1 }).unwrap();
    append(
        dir.path(),
        &id,
        &LogEntry::Heartbeat { seq: 2, status: HeartbeatStatus::Running, message: None, at_ms: 2 },
    )
    .unwrap();
    assert_eq!(last_seq(dir.path(), &id).unwrap(), 2);
}

#[test]
fn instructions_derive_delivery_flags() {
    let (dir, id) = setup();
    append(dir.path(), &id, &LogEntry::Instruction { seq: 1, text: "first".into(), at_ms: 1 }).unwrap();
    append(dir.path(), &id, &LogEntry::Instruction { seq: 2, text: "second".into(), at_ms: 2 }).unwrap();
    append(dir.path(), &id, &LogEntry::Delivered { seq: 1, at_ms: 3 }).unwrap();

    let views = instructions(dir.path(), &id).unwrap();
    assert_eq!(views.len(), 2);
    assert!(views[0].delivered);
    assert_eq!(views[0].text, "first");
    assert!(!views[1].delivered);
}

#[test]
fn heartbeats_are_excluded_from_instruction_view() {
    let (dir, id) = setup();
    append(
        dir.path(),
        &id,
        &LogEntry::Heartbeat { seq: 1, status: HeartbeatStatus::Running, message: None, at_ms: 1 },
    )
    .unwrap();
    append(dir.path(), &id, &LogEntry::Instruction { seq: 2, text: "x".into(), at_ms: 2 }).unwrap();
    let views = instructions(dir.path(), &id).unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].seq, 2);
}

#[test]
fn torn_trailing_line_is_skipped() {
    let (dir, id) = setup();
    append(dir.path(), &id, &LogEntry::Instruction { seq: 1, text: "ok".into(), at_ms: 1 }).unwrap();
    // Simulate a crash mid-append.
    let path = log_path(dir.path(), &id);
    let mut data = fs::read_to_string(&path).unwrap();
    data.push_str("{\"kind\":\"instruc");
    fs::write(&path, data).unwrap();

    let entries = read_all(dir.path(), &id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq(), 1);
}

#[test]
fn remove_is_idempotent() {
    let (dir, id) = setup();
    append(dir.path(), &id, &LogEntry::Delivered { seq: 1, at_ms: 1 }).unwrap();
    remove(dir.path(), &id).unwrap();
    assert!(!log_path(dir.path(), &id).exists());
    remove(dir.path(), &id).unwrap();
}

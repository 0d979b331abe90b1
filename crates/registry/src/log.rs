// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only per-agent log for instructions and heartbeat history.
//!
//! One JSONL file per agent under `<registry>/log/<agent_id>.jsonl`.
//! Entries are never rewritten: instruction delivery is recorded as a
//! separate `Delivered` marker and the pending set is derived by replay.

use fleet_core::{AgentId, HeartbeatStatus};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::store::RegistryError;

/// One line of an agent's log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    /// Operator-supplied follow-up message for the workload to poll.
    Instruction { seq: u64, text: String, at_ms: u64 },
    /// Marks an earlier instruction as fetched by the workload.
    Delivered { seq: u64, at_ms: u64 },
    /// Heartbeat pushed by the workload.
    Heartbeat { seq: u64, status: HeartbeatStatus, message: Option<String>, at_ms: u64 },
}

impl LogEntry {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Instruction { seq, .. } | Self::Delivered { seq, .. } | Self::Heartbeat { seq, .. } => *seq,
        }
    }
}

/// An instruction with its derived delivery state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionView {
    pub seq: u64,
    pub text: String,
    pub at_ms: u64,
    pub delivered: bool,
}

pub(crate) fn log_path(dir: &Path, id: &AgentId) -> PathBuf {
    dir.join("log").join(format!("{}.jsonl", id))
}

/// Append one entry to the agent's log file, creating it on first write.
pub(crate) fn append(dir: &Path, id: &AgentId, entry: &LogEntry) -> Result<(), RegistryError> {
    let path = log_path(dir, id);
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Read every entry of the agent's log; missing file is an empty log.
pub(crate) fn read_all(dir: &Path, id: &AgentId) -> Result<Vec<LogEntry>, RegistryError> {
    let path = log_path(dir, id);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(&path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            // A torn final line from a crash mid-append is tolerated.
            Err(e) => tracing::warn!(agent_id = %id, error = %e, "skipping malformed log line"),
        }
    }
    Ok(entries)
}

/// Highest seq present in the agent's log (0 when empty).
pub(crate) fn last_seq(dir: &Path, id: &AgentId) -> Result<u64, RegistryError> {
    Ok(read_all(dir, id)?.iter().map(LogEntry::seq).max().unwrap_or(0))
}

/// Derive the instruction list, oldest first, with delivery flags applied.
pub(crate) fn instructions(dir: &Path, id: &AgentId) -> Result<Vec<InstructionView>, RegistryError> {
    let entries = read_all(dir, id)?;
    let mut views: Vec<InstructionView> = Vec::new();
    for entry in &entries {
        if let LogEntry::Instruction { seq, text, at_ms } = entry {
            views.push(InstructionView {
                seq: *seq,
                text: text.clone(),
                at_ms: *at_ms,
                delivered: false,
            });
        }
    }
    for entry in &entries {
        if let LogEntry::Delivered { seq, .. } = entry {
            if let Some(view) = views.iter_mut().find(|v| v.seq == *seq) {
                view.delivered = true;
            }
        }
    }
    Ok(views)
}

/// Remove the agent's log file, tolerating absence.
pub(crate) fn remove(dir: &Path, id: &AgentId) -> Result<(), RegistryError> {
    let path = log_path(dir, id);
    if path.exists() {
        fs::remove_file(&path)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;

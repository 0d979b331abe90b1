// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable agent record table.

use fleet_core::{AgentId, AgentRecord, AgentStatus, HeartbeatStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::log::{self, InstructionView, LogEntry};

/// Current snapshot schema version.
const SNAPSHOT_VERSION: u32 = 1;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("agent already exists: {0}")]
    AlreadyExists(String),

    /// Compare-and-swap rejection: the record was not in an expected status.
    #[error("agent {id} is {current}, expected one of {expected:?}")]
    StatusMismatch { id: String, current: AgentStatus, expected: Vec<AgentStatus> },

    /// The requested edge is not part of the lifecycle graph.
    #[error("illegal transition for {id}: {from} -> {to}")]
    IllegalTransition { id: String, from: AgentStatus, to: AgentStatus },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk shape of `agents.json`.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    #[serde(rename = "v")]
    version: u32,
    agents: Vec<AgentRecord>,
}

/// Durable CRUD store for agent records plus the per-agent log.
///
/// All mutation methods persist before returning; a crash between the
/// registry write and the corresponding provider call is resolved by the
/// reconciler's poll signal, not by transactional coupling.
#[derive(Debug)]
pub struct Registry {
    dir: PathBuf,
    records: Mutex<HashMap<AgentId, AgentRecord>>,
}

impl Registry {
    /// Open (or initialize) a registry rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("log"))?;

        let snapshot_path = dir.join("agents.json");
        let records = if snapshot_path.exists() {
            let data = fs::read_to_string(&snapshot_path)?;
            let snapshot: Snapshot = serde_json::from_str(&data)?;
            tracing::info!(count = snapshot.agents.len(), "loaded agent registry");
            snapshot.agents.into_iter().map(|r| (r.id.clone(), r)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self { dir, records: Mutex::new(records) })
    }

    /// Insert a fresh record; rejects duplicate ids.
    pub fn insert(&self, record: AgentRecord) -> Result<(), RegistryError> {
        {
            let mut records = self.records.lock();
            if records.contains_key(&record.id) {
                return Err(RegistryError::AlreadyExists(record.id.to_string()));
            }
            records.insert(record.id.clone(), record);
        }
        self.persist()
    }

    /// Insert a record regardless of prior existence (manual resync upsert).
    pub fn upsert(&self, record: AgentRecord) -> Result<(), RegistryError> {
        self.records.lock().insert(record.id.clone(), record);
        self.persist()
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentRecord> {
        self.records.lock().get(id).cloned()
    }

    /// All records, optionally filtered by status, newest first.
    pub fn list(&self, status: Option<AgentStatus>) -> Vec<AgentRecord> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms).then(a.id.as_str().cmp(b.id.as_str())));
        records
    }

    /// All records whose status is non-terminal.
    pub fn list_active(&self) -> Vec<AgentRecord> {
        self.records.lock().values().filter(|r| !r.status.is_terminal()).cloned().collect()
    }

    /// Compare-and-swap status transition.
    ///
    /// Succeeds only when the current status is in `expected` and
    /// `current -> next` is an edge of the lifecycle graph; `apply` then
    /// runs on the record (timestamps, resource id, cause) before the
    /// status is set and the snapshot persisted. Returns the updated record.
    pub fn transition(
        &self,
        id: &AgentId,
        expected: &[AgentStatus],
        next: AgentStatus,
        apply: impl FnOnce(&mut AgentRecord),
    ) -> Result<AgentRecord, RegistryError> {
        let updated = {
            let mut records = self.records.lock();
            let record = records
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

            if !expected.contains(&record.status) {
                return Err(RegistryError::StatusMismatch {
                    id: id.to_string(),
                    current: record.status,
                    expected: expected.to_vec(),
                });
            }
            if !record.status.can_advance(next) {
                return Err(RegistryError::IllegalTransition {
                    id: id.to_string(),
                    from: record.status,
                    to: next,
                });
            }

            apply(record);
            let from = record.status;
            record.status = next;
            tracing::debug!(agent_id = %id, %from, to = %next, "status transition");
            record.clone()
        };
        self.persist()?;
        Ok(updated)
    }

    /// Mutate non-status fields of a record (address refresh, heartbeat time).
    pub fn update(
        &self,
        id: &AgentId,
        apply: impl FnOnce(&mut AgentRecord),
    ) -> Result<AgentRecord, RegistryError> {
        let updated = {
            let mut records = self.records.lock();
            let record = records
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            apply(record);
            record.clone()
        };
        self.persist()?;
        Ok(updated)
    }

    /// Remove a record and its log. Returns the removed record.
    pub fn remove(&self, id: &AgentId) -> Result<AgentRecord, RegistryError> {
        let removed = self
            .records
            .lock()
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        self.persist()?;
        log::remove(&self.dir, id)?;
        Ok(removed)
    }

    // ---- instruction / heartbeat log ----

    /// Append an operator instruction; returns its sequence number.
    pub fn append_instruction(
        &self,
        id: &AgentId,
        text: impl Into<String>,
        at_ms: u64,
    ) -> Result<u64, RegistryError> {
        self.require(id)?;
        let seq = log::last_seq(&self.dir, id)? + 1;
        log::append(&self.dir, id, &LogEntry::Instruction { seq, text: text.into(), at_ms })?;
        Ok(seq)
    }

    /// Mark an instruction as fetched by the workload.
    pub fn mark_delivered(&self, id: &AgentId, seq: u64, at_ms: u64) -> Result<(), RegistryError> {
        self.require(id)?;
        log::append(&self.dir, id, &LogEntry::Delivered { seq, at_ms })
    }

    /// Append a heartbeat to the agent's history.
    pub fn record_heartbeat(
        &self,
        id: &AgentId,
        status: HeartbeatStatus,
        message: Option<String>,
        at_ms: u64,
    ) -> Result<(), RegistryError> {
        self.require(id)?;
        let seq = log::last_seq(&self.dir, id)? + 1;
        log::append(&self.dir, id, &LogEntry::Heartbeat { seq, status, message, at_ms })
    }

    /// Instruction list with derived delivery flags, oldest first.
    pub fn instructions(&self, id: &AgentId) -> Result<Vec<InstructionView>, RegistryError> {
        self.require(id)?;
        log::instructions(&self.dir, id)
    }

    /// Full log history (instructions, delivery markers, heartbeats).
    pub fn history(&self, id: &AgentId) -> Result<Vec<LogEntry>, RegistryError> {
        self.require(id)?;
        log::read_all(&self.dir, id)
    }

    fn require(&self, id: &AgentId) -> Result<(), RegistryError> {
        if self.records.lock().contains_key(id) {
            Ok(())
        } else {
            Err(RegistryError::NotFound(id.to_string()))
        }
    }

    /// Write the snapshot atomically: temp file, rename, previous kept as `.bak`.
    fn persist(&self) -> Result<(), RegistryError> {
        let snapshot = {
            let records = self.records.lock();
            Snapshot { version: SNAPSHOT_VERSION, agents: records.values().cloned().collect() }
        };
        let path = self.dir.join("agents.json");
        let tmp = self.dir.join("agents.json.tmp");

        let data = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&tmp, data)?;
        if path.exists() {
            let _ = fs::rename(&path, self.dir.join("agents.json.bak"));
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Registry root directory (for co-located stores, e.g. objects).
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use fleet_core::{AgentId, AgentRecord, AgentStatus, Backend, OrchestratorError, TaskSpec};
use fleet_registry::InstructionView;
use serde::{Deserialize, Serialize};

/// Client-facing view of one agent record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentView {
    pub id: AgentId,
    pub status: AgentStatus,
    pub backend: Backend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ms: Option<u64>,
    /// Derived label: live but silent past the heartbeat grace window.
    /// Never a status — the record itself is untouched.
    #[serde(default)]
    pub unresponsive: bool,
    /// Instructions queued but not yet fetched by the workload.
    #[serde(default)]
    pub pending_instructions: usize,
    pub task: TaskSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentView {
    pub fn from_record(record: &AgentRecord, unresponsive: bool, pending_instructions: usize) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            backend: record.backend,
            resource_id: record.resource_id.clone(),
            address: record.address.clone(),
            created_at_ms: record.created_at_ms,
            started_at_ms: record.started_at_ms,
            stopped_at_ms: record.stopped_at_ms,
            last_heartbeat_ms: record.last_heartbeat_ms,
            unresponsive,
            pending_instructions,
            task: record.task.clone(),
            error: record.error.clone(),
        }
    }
}

/// Response from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    Ok,
    Pong,
    Hello { version: String },
    Agent { agent: AgentView },
    Agents { agents: Vec<AgentView> },
    Instructions { instructions: Vec<InstructionView> },
    ShuttingDown,
    Error { kind: String, message: String },
}

impl Response {
    /// Map an orchestration error onto the wire.
    pub fn from_error(err: &OrchestratorError) -> Self {
        Self::Error { kind: err.kind().to_string(), message: err.to_string() }
    }
}

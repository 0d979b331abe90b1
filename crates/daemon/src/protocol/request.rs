// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use fleet_core::{AgentId, AgentStatus, Backend, HeartbeatStatus, TaskSpec};
use serde::{Deserialize, Serialize};

/// Request from a client (CLI or workload) to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Version handshake
    Hello {
        version: String,
        /// Auth token for TCP connections (ignored for Unix socket)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Provision a new agent
    CreateAgent {
        /// Caller-supplied id; generated when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<AgentId>,
        task: TaskSpec,
        /// Override the daemon's configured backend
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backend: Option<Backend>,
    },

    /// Fetch one agent's record
    GetAgent { id: AgentId },

    /// List agents, optionally filtered by status
    ListAgents {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<AgentStatus>,
    },

    /// Tear down an agent's resource, keeping the record
    StopAgent { id: AgentId },

    /// Tear down an agent's resource and remove the record
    DeleteAgent { id: AgentId },

    /// Queue a follow-up instruction for a running agent
    TellAgent { id: AgentId, instruction: String },

    /// Workload progress report
    Heartbeat {
        id: AgentId,
        status: HeartbeatStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Workload fetch of undelivered instructions
    PullInstructions { id: AgentId },

    /// Force an immediate reconciliation pass, adopting unknown resources
    Resync,

    /// Request daemon shutdown
    Shutdown,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable agent record and its status machine.
//!
//! `AgentRecord` is the authoritative representation of one orchestrated
//! remote task. The orchestrator mutates it on operator-driven transitions;
//! the reconciler mutates it on observed-state transitions and heartbeat
//! ingestion. `status` moves monotonically along the graph encoded in
//! [`AgentStatus::can_advance`] — the registry's compare-and-swap update is
//! the only write path, so an illegal edge can never be persisted.

use crate::id::AgentId;
use crate::task::{Backend, TaskSpec};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an agent.
///
/// `Stopped`, `Failed`, and `TimedOut` are terminal: no outbound edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Record inserted; backend resource not yet confirmed.
    Pending,
    /// Backend resource created; workload has not reported in yet.
    Starting,
    /// Workload reported a running heartbeat.
    Running,
    /// Operator-driven teardown in progress.
    Stopping,
    /// Resource gone after a normal stop or completed task.
    Stopped,
    /// Creation failed, or the resource vanished before the workload ran.
    Failed,
    /// Timeout budget expired without the task completing.
    TimedOut,
}

impl AgentStatus {
    /// True for statuses with no outbound transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::TimedOut)
    }

    /// True while a backend resource is (or may be) live for this record.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// `Running -> Stopped` is reserved for the heartbeat/poll observation
    /// paths; operator stops route through `Stopping`.
    pub fn can_advance(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Pending, Starting)
                | (Pending, Failed)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Failed)
                | (Starting, TimedOut)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// The unit of orchestration: one logical agent and the backend resource
/// that realizes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Globally unique, immutable; the backend idempotency key.
    pub id: AgentId,
    pub status: AgentStatus,
    /// Which provider implementation owns this record. Immutable.
    pub backend: Backend,
    /// Opaque backend id, set once the provider confirms creation.
    /// Retained after terminal states for audit, never cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Reachable endpoint for the remote resource, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub created_at_ms: u64,
    /// Write-once: set by the transition into `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    /// Write-once: set by the transition into a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at_ms: Option<u64>,
    /// Most recent heartbeat ingestion; absent before the first one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ms: Option<u64>,
    /// Immutable task definition fixed at creation.
    pub task: TaskSpec,
    /// Human-readable failure cause, retained on the record so a later
    /// get explains what happened without log access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentRecord {
    /// Fresh `Pending` record for a create request.
    pub fn new(id: AgentId, backend: Backend, task: TaskSpec, now_ms: u64) -> Self {
        Self {
            id,
            status: AgentStatus::Pending,
            backend,
            resource_id: None,
            address: None,
            created_at_ms: now_ms,
            started_at_ms: None,
            stopped_at_ms: None,
            last_heartbeat_ms: None,
            task,
            error: None,
        }
    }

    /// Set `started_at_ms` if unset (write-once).
    pub fn mark_started(&mut self, now_ms: u64) {
        if self.started_at_ms.is_none() {
            self.started_at_ms = Some(now_ms);
        }
    }

    /// Set `stopped_at_ms` if unset (write-once).
    pub fn mark_stopped(&mut self, now_ms: u64) {
        if self.stopped_at_ms.is_none() {
            self.stopped_at_ms = Some(now_ms);
        }
    }

    /// Whether the task's timeout budget has elapsed since creation.
    pub fn timeout_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) > self.task.timeout_secs * 1000
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;

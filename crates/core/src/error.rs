// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared by the orchestration layers.

use thiserror::Error;

/// Errors surfaced by control-plane operations.
///
/// Propagation policy: `NotFound`/`Conflict` surface immediately to the
/// caller; `BackendUnavailable` is retried with bounded backoff inside the
/// orchestrator before the record is marked failed; `Timeout` is never
/// blindly retried — the next reconciler poll resolves it.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend rejected request: {0}")]
    BackendRejected(String),

    #[error("backend call timed out after {0} ms; outcome unknown, deferred to reconciliation")]
    Timeout(u64),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("secret broker error: {0}")]
    Broker(String),
}

impl OrchestratorError {
    /// Wire-level discriminant used by the protocol's error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::BackendRejected(_) => "backend_rejected",
            Self::Timeout(_) => "timeout",
            Self::Registry(_) => "registry",
            Self::Broker(_) => "broker",
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Immutable task definition and backend selection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default task budget: 4 hours.
pub const DEFAULT_TIMEOUT_SECS: u64 = 14_400;

/// Default machine class for VM-backed agents.
pub const DEFAULT_MACHINE_CLASS: &str = "e2-medium";

/// Which provider implementation owns an agent's backend resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Billable VM instance with a boot-time startup-script slot.
    Gce,
    /// Pod with an environment-variable injection slot.
    Kubernetes,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gce => write!(f, "gce"),
            Self::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// AI engine the remote workload runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Claude,
    Codex,
}

impl Default for Engine {
    fn default() -> Self {
        Self::Claude
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::Codex => write!(f, "codex"),
        }
    }
}

/// The task an agent was created to perform. Fixed at creation; operator
/// follow-ups are appended to the instruction log, never merged here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task prompt / application specification. Treated as opaque data by
    /// the boot script generator (base64, never shell-interpolated).
    pub prompt: String,
    #[serde(default)]
    pub engine: Engine,
    /// Git repository to clone into the workspace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Bounded-duration guard for task execution.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Provider machine class (VM shape / pod size hint).
    #[serde(default = "default_machine_class")]
    pub machine_class: String,
    /// Preemptible capacity, where the backend supports it.
    #[serde(default)]
    pub spot: bool,
    /// Max harness iterations (0 = unlimited).
    #[serde(default)]
    pub max_iterations: u32,
    /// Leave the resource running after task completion.
    #[serde(default)]
    pub keep_alive: bool,
}

impl TaskSpec {
    /// Minimal spec with defaults for everything but the prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            engine: Engine::default(),
            repo: None,
            branch: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            machine_class: DEFAULT_MACHINE_CLASS.to_string(),
            spot: false,
            max_iterations: 0,
            keep_alive: false,
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_machine_class() -> String {
    DEFAULT_MACHINE_CLASS.to_string()
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;

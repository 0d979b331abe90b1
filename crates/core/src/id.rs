// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent identifier type.
//!
//! `AgentId` is the join key between an `AgentRecord` and the backend
//! resource it tracks: providers label every resource they create with
//! the id, and `create_resource` uses it as the idempotency key.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// Unique identifier for an orchestrated agent.
///
/// Format is `agt-{nanoid}` when generated, but callers may supply their
/// own id at creation time and the format is opaque to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(SmolStr);

impl AgentId {
    pub const PREFIX: &'static str = "agt-";

    /// Generate a new random id with the type prefix.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(SmolStr::new(format!("{}{}", Self::PREFIX, nanoid::nanoid!(19))))
    }

    /// Create an id from an existing string (caller-supplied or parsed).
    pub fn from_string(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a prefix of the id truncated to at most `n` characters,
    /// for compact log lines.
    pub fn short(&self, n: usize) -> &str {
        let end = std::cmp::min(n, self.0.len());
        &self.0[..end]
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for AgentId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for AgentId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::borrow::Borrow<str> for AgentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fleet-registry: durable store for agent records.
//!
//! The registry is the single source of truth for orchestration state. It
//! holds one table of [`fleet_core::AgentRecord`] keyed by id, persisted as
//! an atomically-replaced JSON snapshot, plus an append-only per-agent JSONL
//! log for operator instructions and heartbeat history keyed by
//! `(agent_id, seq)`.
//!
//! Status writes go through [`Registry::transition`], a compare-and-swap
//! that rejects both unexpected current statuses and edges outside the
//! lifecycle graph — per-agent serialization is therefore safe even when
//! callers race (orchestrator vs. reconciler).

mod log;
mod store;

pub use log::{InstructionView, LogEntry};
pub use store::{Registry, RegistryError};

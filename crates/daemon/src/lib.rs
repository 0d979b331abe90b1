// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fleet-daemon: the orchestration control plane.
//!
//! `fleetd` owns the registry, the provider backend, and two actors over
//! them: the [`orchestrator::Orchestrator`] for operator-driven transitions
//! and the [`reconciler::Reconciler`] for observed-state convergence. The
//! listener exposes both over a Unix socket (framed protocol) and an
//! optional TCP port (framed protocol plus a minimal HTTP surface for
//! workload heartbeats).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod env;
pub mod lifecycle;
pub mod listener;
pub mod orchestrator;
pub mod protocol;
pub mod reconciler;

pub use protocol::{AgentView, Request, Response};

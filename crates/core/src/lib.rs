// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fleet-core: data model and leaf types for the fleet orchestrator.
//!
//! Everything here is backend-agnostic: the agent record and its status
//! machine, the immutable task definition, heartbeat vocabulary, clock
//! abstraction, and the error taxonomy shared by the orchestration layers.

pub mod clock;
pub mod error;
pub mod heartbeat;
pub mod id;
pub mod record;
pub mod task;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::OrchestratorError;
pub use heartbeat::HeartbeatStatus;
pub use id::AgentId;
pub use record::{AgentRecord, AgentStatus};
pub use task::{Backend, Engine, TaskSpec};

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Protocol version (from Cargo.toml)
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve state directory: FLEET_STATE_DIR > XDG_STATE_HOME/fleet > ~/.local/state/fleet
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("FLEET_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("fleet"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/fleet"))
}

/// Default IPC timeout
pub fn ipc_timeout() -> Duration {
    std::env::var("FLEET_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

/// TCP port for remote connections. When set, the daemon listens on this
/// port in addition to the Unix socket. Workload heartbeats arrive here.
pub fn tcp_port() -> Option<u16> {
    std::env::var("FLEET_TCP_PORT").ok().and_then(|s| s.parse::<u16>().ok())
}

/// Auth token for TCP connections. Required when `FLEET_TCP_PORT` is set.
/// Validated in the Hello handshake and on workload heartbeat requests.
pub fn auth_token() -> Option<String> {
    std::env::var("FLEET_AUTH_TOKEN").ok().filter(|s| !s.is_empty())
}

/// Reconciler poll interval override
pub fn poll_interval_override() -> Option<Duration> {
    std::env::var("FLEET_POLL_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, logging.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use fleet_registry::Registry;
use fs2::FileExt;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tracing::{info, warn};

use crate::config::Config;
use crate::env;

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("failed to bind tcp port {0}: {1}")]
    TcpBindFailed(u16, std::io::Error),

    #[error("registry error: {0}")]
    Registry(#[from] fleet_registry::RegistryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Daemon state during operation.
#[derive(Debug)]
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub registry: Arc<Registry>,
}

/// Result of daemon startup: state plus the bound listeners to hand to the
/// Listener task.
#[derive(Debug)]
pub struct StartupResult {
    pub daemon: DaemonState,
    pub unix: UnixListener,
    pub tcp: Option<TcpListener>,
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock —
            // those files belong to the already-running daemon.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    // 1. State directory first (socket, lock, registry all live under it)
    std::fs::create_dir_all(&config.state_dir)?;

    // 2. Acquire lock file before touching anything else - prevents races.
    // OpenOptions without truncate so a failed lock doesn't wipe the
    // running daemon's PID.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    // Write PID to lock file (truncate now that we hold the lock)
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Open the registry
    let registry = Arc::new(Registry::open(&config.registry_dir)?);
    info!(count = registry.list(None).len(), "registry opened");

    // 4. Remove stale socket and bind (last, after all validation passes)
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let unix = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    let tcp = match env::tcp_port() {
        Some(port) => {
            if env::auth_token().is_none() {
                warn!(port, "tcp listener enabled without FLEET_AUTH_TOKEN; remote requests are unauthenticated");
            }
            let listener = TcpListener::bind(("0.0.0.0", port))
                .await
                .map_err(|e| LifecycleError::TcpBindFailed(port, e))?;
            info!(port, "tcp listener bound");
            Some(listener)
        }
        None => None,
    };

    info!("daemon started");
    Ok(StartupResult { daemon: DaemonState { config: config.clone(), lock_file, registry }, unix, tcp })
}

impl DaemonState {
    /// Shutdown the daemon gracefully.
    pub fn shutdown(&mut self) {
        info!("shutting down daemon...");

        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!("failed to remove socket file: {}", e);
            }
        }
        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("failed to remove pid file: {}", e);
            }
        }
        // Lock released when self.lock_file drops.

        info!("daemon shutdown complete");
    }
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

/// File logging with env-filter control; the returned guard must live for
/// the life of the process.
pub fn init_tracing(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    std::fs::create_dir_all(&config.log_dir)?;
    let appender = tracing_appender::rolling::never(&config.log_dir, "fleetd.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

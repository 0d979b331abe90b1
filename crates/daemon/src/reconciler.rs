// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observed-state reconciliation.
//!
//! The reconciler periodically lists the backend's fleet-labelled resources
//! and converges every non-terminal record toward what the backend actually
//! shows: adopted creates, vanished resources, stuck teardowns. It is the
//! resolution path for every "outcome unknown" left behind by a deadline
//! expiry or a daemon crash — the orchestrator never blocks on it, and all
//! of its writes go through the registry's compare-and-swap, so racing a
//! concurrent heartbeat can only lose, never corrupt.

use fleet_core::{AgentId, AgentRecord, AgentStatus, Clock, OrchestratorError, TaskSpec};
use fleet_provider::{Provider, ResourceDescriptor, ResourceHealth};
use fleet_registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Knobs the reconciler needs from the daemon config.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval_ms: u64,
    pub heartbeat_grace_ms: u64,
    pub create_grace_ms: u64,
    pub provider_timeout_ms: u64,
}

impl From<&Config> for ReconcilerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            poll_interval_ms: cfg.poll_interval_ms,
            heartbeat_grace_ms: cfg.heartbeat_grace_ms,
            create_grace_ms: cfg.create_grace_ms,
            provider_timeout_ms: cfg.provider_timeout_ms,
        }
    }
}

pub struct Reconciler<P: Provider, C: Clock> {
    registry: Arc<Registry>,
    provider: Arc<P>,
    clock: C,
    cfg: ReconcilerConfig,
}

impl<P: Provider, C: Clock> Reconciler<P, C> {
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<P>,
        clock: C,
        cfg: ReconcilerConfig,
    ) -> Self {
        Self { registry, provider, clock, cfg }
    }

    /// Poll loop; runs until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let interval = Duration::from_millis(self.cfg.poll_interval_ms);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("reconciler stopping");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.poll_cycle().await {
                        warn!(error = %e, "reconciliation cycle skipped");
                    }
                }
            }
        }
    }

    /// One reconciliation pass over all non-terminal records.
    pub async fn poll_cycle(&self) -> Result<(), OrchestratorError> {
        let observed = self.observe().await?;
        let now = self.clock.epoch_ms();

        for record in self.registry.list_active() {
            let resource_id =
                record.resource_id.clone().unwrap_or_else(|| record.id.to_string());
            let desc = observed.get(resource_id.as_str());
            if let Err(e) = self.converge(&record, desc, now).await {
                // A concurrent heartbeat or stop can win the CAS race;
                // that's the correct outcome, not a fault.
                debug!(agent_id = %record.id, error = %e, "convergence step lost or failed");
            }
        }
        Ok(())
    }

    async fn converge(
        &self,
        record: &AgentRecord,
        desc: Option<&ResourceDescriptor>,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        let id = &record.id;
        match (record.status, desc) {
            // Create resolved out-of-band (crash or deadline expiry): adopt.
            (AgentStatus::Pending, Some(desc)) => {
                let resource_id = desc.resource_id.clone();
                let address = desc.address.clone();
                self.registry
                    .transition(id, &[AgentStatus::Pending], AgentStatus::Starting, |r| {
                        r.resource_id = Some(resource_id);
                        r.address = address;
                    })
                    .map_err(map_registry)?;
                info!(agent_id = %id, "adopted resource for unresolved create");
            }
            (AgentStatus::Pending, None) => {
                if now.saturating_sub(record.created_at_ms) > self.cfg.create_grace_ms {
                    self.registry
                        .transition(id, &[AgentStatus::Pending], AgentStatus::Failed, |r| {
                            r.error = Some("create unresolved past grace window".to_string());
                            r.mark_stopped(now);
                        })
                        .map_err(map_registry)?;
                    info!(agent_id = %id, "failed unresolved create");
                }
            }

            // Resource vanished under a live agent: preemption, manual
            // delete, or the boot script's own teardown after a terminal
            // report the daemon never received.
            (AgentStatus::Starting | AgentStatus::Running, None) => {
                let next = if record.timeout_expired(now) {
                    AgentStatus::TimedOut
                } else if record.status == AgentStatus::Running {
                    AgentStatus::Stopped
                } else {
                    AgentStatus::Failed
                };
                self.registry
                    .transition(id, &[record.status], next, |r| {
                        r.mark_stopped(now);
                        if next == AgentStatus::Failed {
                            r.error =
                                Some("resource disappeared before the workload ran".to_string());
                        }
                    })
                    .map_err(map_registry)?;
                info!(agent_id = %id, status = %next, "resource gone, record finalized");
            }

            (AgentStatus::Starting | AgentStatus::Running, Some(desc)) => {
                if desc.address.is_some() && desc.address != record.address {
                    let address = desc.address.clone();
                    self.registry
                        .update(id, |r| r.address = address)
                        .map_err(map_registry)?;
                }
            }

            (AgentStatus::Stopping, None) => {
                self.registry
                    .transition(id, &[AgentStatus::Stopping], AgentStatus::Stopped, |r| {
                        r.mark_stopped(now);
                    })
                    .map_err(map_registry)?;
                info!(agent_id = %id, "teardown confirmed");
            }

            // Stuck teardown: re-issue the delete.
            (AgentStatus::Stopping, Some(desc)) => {
                let deadline = Duration::from_millis(self.cfg.provider_timeout_ms);
                match tokio::time::timeout(
                    deadline,
                    self.provider.delete_resource(&desc.resource_id),
                )
                .await
                {
                    Ok(Ok(())) => debug!(agent_id = %id, "re-issued delete for stuck teardown"),
                    Ok(Err(e)) => warn!(agent_id = %id, error = %e, "teardown retry failed"),
                    Err(_) => warn!(agent_id = %id, "teardown retry timed out"),
                }
            }

            // list_active never yields terminal records.
            (AgentStatus::Stopped | AgentStatus::Failed | AgentStatus::TimedOut, _) => {}
        }
        Ok(())
    }

    /// Poll, then adopt any fleet-labelled resource the registry has never
    /// heard of (registry loss, out-of-band creation).
    pub async fn resync(&self) -> Result<(), OrchestratorError> {
        let observed = self.observe().await?;
        let now = self.clock.epoch_ms();

        for desc in observed.values() {
            let id = match &desc.agent_id {
                Some(id) => id.clone(),
                None => AgentId::from_string(desc.resource_id.as_str()),
            };
            if self.registry.get(&id).is_some() {
                continue;
            }
            let mut record =
                AgentRecord::new(id.clone(), self.provider.backend(), TaskSpec::new("(recovered)"), now);
            record.status = match desc.health {
                ResourceHealth::Provisioning => AgentStatus::Starting,
                ResourceHealth::Running => AgentStatus::Running,
                ResourceHealth::Terminating => AgentStatus::Stopping,
            };
            record.resource_id = Some(desc.resource_id.clone());
            record.address = desc.address.clone();
            self.registry.upsert(record).map_err(map_registry)?;
            info!(agent_id = %id, resource_id = %desc.resource_id, "adopted unknown resource");
        }

        self.poll_cycle().await
    }

    /// Whether a record should be labelled unresponsive in views: live,
    /// with no heartbeat inside the grace window.
    pub fn unresponsive(&self, record: &AgentRecord, now: u64) -> bool {
        derive_unresponsive(record, now, self.cfg.heartbeat_grace_ms)
    }

    async fn observe(&self) -> Result<HashMap<String, ResourceDescriptor>, OrchestratorError> {
        let deadline = Duration::from_millis(self.cfg.provider_timeout_ms);
        let list = tokio::time::timeout(deadline, self.provider.list_resources())
            .await
            .map_err(|_| OrchestratorError::Timeout(self.cfg.provider_timeout_ms))?
            .map_err(|e| OrchestratorError::BackendUnavailable(e.to_string()))?;
        Ok(list.into_iter().map(|d| (d.resource_id.clone(), d)).collect())
    }
}

/// Pure form of the unresponsive label, usable without a reconciler.
pub fn derive_unresponsive(record: &AgentRecord, now_ms: u64, grace_ms: u64) -> bool {
    if !record.status.is_live() {
        return false;
    }
    let basis = record.last_heartbeat_ms.unwrap_or(record.created_at_ms);
    now_ms.saturating_sub(basis) > grace_ms
}

fn map_registry(err: fleet_registry::RegistryError) -> OrchestratorError {
    OrchestratorError::Registry(err.to_string())
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;

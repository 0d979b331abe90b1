// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator-driven lifecycle operations.
//!
//! One orchestrator per daemon, generic over the [`Provider`] backend and
//! the clock. Every operation follows the same shape: registry first (the
//! durable intent), provider second, registry again to record the outcome.
//! Provider calls run under a per-agent async lock so create/stop/heartbeat
//! for the same agent never interleave, and under an outer deadline so a
//! hung backend cannot wedge the daemon — a deadline expiry leaves the
//! record where it was and defers resolution to the reconciler's next poll.

use fleet_core::{
    AgentId, AgentRecord, AgentStatus, Clock, HeartbeatStatus, OrchestratorError, TaskSpec,
};
use fleet_provider::{
    bootscript::{self, BootParams},
    Provider, ProviderError, ResourceSpec, SecretBroker,
};
use fleet_registry::{InstructionView, Registry, RegistryError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, AUTH_SECRET};

/// Knobs the orchestrator needs from the daemon config.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub create_retries: u32,
    pub retry_base_ms: u64,
    pub provider_timeout_ms: u64,
    pub required_secrets: Vec<String>,
    pub optional_secrets: Vec<String>,
    pub control_plane_url: String,
}

impl From<&Config> for OrchestratorConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            create_retries: cfg.create_retries,
            retry_base_ms: cfg.retry_base_ms,
            provider_timeout_ms: cfg.provider_timeout_ms,
            required_secrets: cfg.required_secrets.clone(),
            optional_secrets: cfg.optional_secrets.clone(),
            control_plane_url: cfg.control_plane_url.clone(),
        }
    }
}

pub struct Orchestrator<P: Provider, C: Clock> {
    registry: Arc<Registry>,
    provider: Arc<P>,
    broker: SecretBroker,
    clock: C,
    cfg: OrchestratorConfig,
    /// Per-agent serialization of provider calls.
    locks: Mutex<HashMap<AgentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<P: Provider, C: Clock> Orchestrator<P, C> {
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<P>,
        clock: C,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            provider,
            broker: SecretBroker::new(),
            clock,
            cfg,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Provision a new agent. The `Pending` record is inserted before any
    /// provider call, so a crash mid-create leaves durable evidence for the
    /// reconciler to resolve.
    pub async fn create(
        &self,
        id: Option<AgentId>,
        task: TaskSpec,
    ) -> Result<AgentRecord, OrchestratorError> {
        let id = id.unwrap_or_else(AgentId::new);
        let backend = self.provider.backend();
        let record = AgentRecord::new(id.clone(), backend, task, self.clock.epoch_ms());
        self.registry.insert(record).map_err(map_registry)?;

        let guard = self.lock_for(&id);
        let _held = guard.lock().await;

        let handles = match self
            .broker
            .resolve(&*self.provider, &self.cfg.required_secrets, &self.cfg.optional_secrets)
            .await
        {
            Ok(handles) => handles,
            Err(e) => {
                self.fail_pending(&id, format!("credential resolution failed: {e}"));
                return Err(OrchestratorError::Broker(e.to_string()));
            }
        };

        let record = self.registry.get(&id).ok_or_else(|| not_found(&id))?;
        let boot_program = bootscript::generate(&BootParams {
            agent_id: &id,
            task: &record.task,
            backend,
            control_plane_url: &self.cfg.control_plane_url,
            secrets: &handles,
            auth_secret: AUTH_SECRET,
        });
        let spec = ResourceSpec {
            agent_id: id.clone(),
            machine_class: record.task.machine_class.clone(),
            spot: record.task.spot,
            boot_program,
            secrets: handles,
        };

        let deadline = Duration::from_millis(self.cfg.provider_timeout_ms);
        let mut attempt: u32 = 0;
        let created = loop {
            let result = tokio::time::timeout(deadline, self.provider.create_resource(&spec)).await;
            match result {
                // Deadline expiry: outcome unknown. The record stays
                // Pending; the next poll either adopts the resource or
                // fails the record after the create grace window.
                Err(_) => {
                    warn!(agent_id = %id, "create deadline expired, deferring to reconciliation");
                    return Err(OrchestratorError::Timeout(self.cfg.provider_timeout_ms));
                }
                Ok(Ok(created)) => break created,
                Ok(Err(e)) => {
                    if let Some(partial) = e.partial_resource().map(str::to_string) {
                        // The backend allocated before failing: tear the
                        // orphan down instead of retrying into a duplicate.
                        warn!(agent_id = %id, resource_id = %partial, "cleaning up partial create");
                        if let Err(del) =
                            self.with_deadline(self.provider.delete_resource(&partial)).await
                        {
                            warn!(agent_id = %id, error = %del, "partial cleanup failed");
                        }
                        self.fail_pending(&id, e.to_string());
                        return Err(map_provider(e));
                    }
                    if e.is_retryable() && attempt < self.cfg.create_retries {
                        let delay = self.cfg.retry_base_ms << attempt;
                        attempt += 1;
                        warn!(agent_id = %id, attempt, delay_ms = delay, "transient create failure, retrying");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue;
                    }
                    self.fail_pending(&id, e.to_string());
                    return Err(map_provider(e));
                }
            }
        };

        let record = self
            .registry
            .transition(&id, &[AgentStatus::Pending], AgentStatus::Starting, |r| {
                r.resource_id = Some(created.resource_id.clone());
                r.address = created.address.clone();
            })
            .map_err(map_registry)?;
        info!(agent_id = %id, resource_id = %created.resource_id, "agent provisioned");
        Ok(record)
    }

    /// Tear down an agent's resource. Idempotent: stopping a terminal agent
    /// returns its record unchanged.
    pub async fn stop(&self, id: &AgentId) -> Result<AgentRecord, OrchestratorError> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;
        self.stop_locked(id).await
    }

    async fn stop_locked(&self, id: &AgentId) -> Result<AgentRecord, OrchestratorError> {
        let record = self.registry.get(id).ok_or_else(|| not_found(id))?;
        if record.status.is_terminal() {
            return Ok(record);
        }
        if record.status == AgentStatus::Pending {
            return Err(OrchestratorError::Conflict(format!(
                "agent {id} is still being created"
            )));
        }

        if record.status != AgentStatus::Stopping {
            self.registry
                .transition(
                    id,
                    &[AgentStatus::Starting, AgentStatus::Running],
                    AgentStatus::Stopping,
                    |_| {},
                )
                .map_err(map_registry)?;
        }

        let resource_id =
            record.resource_id.clone().unwrap_or_else(|| id.to_string());
        if let Err(e) = self.with_deadline(self.provider.delete_resource(&resource_id)).await {
            // Leave the record in Stopping; the reconciler re-attempts the
            // delete on its next pass.
            let msg = e.to_string();
            let _ = self.registry.update(id, |r| r.error = Some(msg.clone()));
            return Err(e);
        }

        let now = self.clock.epoch_ms();
        let record = self
            .registry
            .transition(id, &[AgentStatus::Stopping], AgentStatus::Stopped, |r| {
                r.mark_stopped(now);
            })
            .map_err(map_registry)?;
        info!(agent_id = %id, "agent stopped");
        Ok(record)
    }

    /// Stop (if live) and remove the record and its log.
    pub async fn delete(&self, id: &AgentId) -> Result<AgentRecord, OrchestratorError> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        let record = self.registry.get(id).ok_or_else(|| not_found(id))?;
        if record.status.is_live() {
            self.stop_locked(id).await?;
        } else if record.status == AgentStatus::Pending {
            // Unresolved create: best-effort teardown of anything the
            // backend may have allocated under the agent's name.
            let _ = self.with_deadline(self.provider.delete_resource(id.as_str())).await;
        }
        let removed = self.registry.remove(id).map_err(map_registry)?;
        self.locks.lock().remove(id);
        info!(agent_id = %id, "agent deleted");
        Ok(removed)
    }

    /// Queue a follow-up instruction for a running agent.
    pub async fn tell(&self, id: &AgentId, instruction: String) -> Result<u64, OrchestratorError> {
        let record = self.registry.get(id).ok_or_else(|| not_found(id))?;
        if record.status != AgentStatus::Running {
            return Err(OrchestratorError::Conflict(format!(
                "agent {id} is {}, instructions require running",
                record.status
            )));
        }
        let seq = self
            .registry
            .append_instruction(id, instruction, self.clock.epoch_ms())
            .map_err(map_registry)?;
        Ok(seq)
    }

    /// Ingest one workload heartbeat.
    ///
    /// Terminal records ignore late heartbeats — status never regresses.
    /// A completed/failed report tears the resource down (unless the task
    /// asked to keep it) and finalizes the record in the same call.
    pub async fn heartbeat(
        &self,
        id: &AgentId,
        status: HeartbeatStatus,
        message: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let guard = self.lock_for(id);
        let _held = guard.lock().await;

        let record = self.registry.get(id).ok_or_else(|| not_found(id))?;
        let now = self.clock.epoch_ms();
        self.registry
            .record_heartbeat(id, status, message.clone(), now)
            .map_err(map_registry)?;
        if record.status.is_terminal() {
            tracing::debug!(agent_id = %id, %status, "heartbeat after terminal state, ignored");
            return Ok(());
        }
        self.registry.update(id, |r| r.last_heartbeat_ms = Some(now)).map_err(map_registry)?;

        // First contact from the workload advances Starting -> Running.
        if record.status == AgentStatus::Starting {
            self.registry
                .transition(id, &[AgentStatus::Starting], AgentStatus::Running, |r| {
                    r.mark_started(now);
                })
                .map_err(map_registry)?;
        }

        let terminal_status = match status {
            HeartbeatStatus::Running => return Ok(()),
            HeartbeatStatus::Completed => AgentStatus::Stopped,
            HeartbeatStatus::Failed => AgentStatus::Failed,
        };

        let record = self.registry.get(id).ok_or_else(|| not_found(id))?;
        if record.status != AgentStatus::Running {
            // Pending: the workload beat the create call's return. Leave
            // finalization to the reconciler once the record catches up.
            return Ok(());
        }

        if !record.task.keep_alive {
            let resource_id = record.resource_id.clone().unwrap_or_else(|| id.to_string());
            if let Err(e) = self.with_deadline(self.provider.delete_resource(&resource_id)).await {
                warn!(agent_id = %id, error = %e, "teardown after terminal heartbeat failed");
            }
        }
        self.registry
            .transition(id, &[AgentStatus::Running], terminal_status, |r| {
                r.mark_stopped(now);
                if let Some(msg) = message {
                    if terminal_status == AgentStatus::Failed {
                        r.error = Some(msg);
                    }
                }
            })
            .map_err(map_registry)?;
        info!(agent_id = %id, status = %terminal_status, "agent finished");
        Ok(())
    }

    /// Hand undelivered instructions to the workload, marking them delivered.
    pub async fn pull_instructions(
        &self,
        id: &AgentId,
    ) -> Result<Vec<InstructionView>, OrchestratorError> {
        let views = self.registry.instructions(id).map_err(map_registry)?;
        let now = self.clock.epoch_ms();
        let pending: Vec<InstructionView> =
            views.into_iter().filter(|v| !v.delivered).collect();
        for view in &pending {
            self.registry.mark_delivered(id, view.seq, now).map_err(map_registry)?;
        }
        Ok(pending)
    }

    pub fn get(&self, id: &AgentId) -> Result<AgentRecord, OrchestratorError> {
        self.registry.get(id).ok_or_else(|| not_found(id))
    }

    pub fn list(&self, status: Option<AgentStatus>) -> Vec<AgentRecord> {
        self.registry.list(status)
    }

    /// Count of queued-but-unfetched instructions, for views.
    pub fn pending_instruction_count(&self, id: &AgentId) -> usize {
        self.registry
            .instructions(id)
            .map(|views| views.iter().filter(|v| !v.delivered).count())
            .unwrap_or(0)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn lock_for(&self, id: &AgentId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(id.clone()).or_default().clone()
    }

    /// CAS the record into Failed from Pending, recording the cause.
    fn fail_pending(&self, id: &AgentId, cause: String) {
        let now = self.clock.epoch_ms();
        if let Err(e) =
            self.registry.transition(id, &[AgentStatus::Pending], AgentStatus::Failed, |r| {
                r.error = Some(cause);
                r.mark_stopped(now);
            })
        {
            warn!(agent_id = %id, error = %e, "could not mark create failure");
        }
    }

    /// Run a provider call under the configured deadline.
    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, OrchestratorError> {
        let ms = self.cfg.provider_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(ms), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_provider(e)),
            Err(_) => Err(OrchestratorError::Timeout(ms)),
        }
    }
}

fn not_found(id: &AgentId) -> OrchestratorError {
    OrchestratorError::NotFound(id.to_string())
}

fn map_registry(err: RegistryError) -> OrchestratorError {
    match err {
        RegistryError::NotFound(id) => OrchestratorError::NotFound(id),
        RegistryError::AlreadyExists(id) => {
            OrchestratorError::Conflict(format!("agent already exists: {id}"))
        }
        e @ (RegistryError::StatusMismatch { .. } | RegistryError::IllegalTransition { .. }) => {
            OrchestratorError::Conflict(e.to_string())
        }
        e => OrchestratorError::Registry(e.to_string()),
    }
}

fn map_provider(err: ProviderError) -> OrchestratorError {
    match &err {
        ProviderError::Unavailable { .. } => OrchestratorError::BackendUnavailable(err.to_string()),
        ProviderError::Rejected { .. } => OrchestratorError::BackendRejected(err.to_string()),
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;

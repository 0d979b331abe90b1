// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory provider for tests.
//!
//! Records every call, supports scripted create failures (including the
//! fail-after-allocating partial-create case), and tracks contract
//! violations: a second `create_resource` for the same agent id without an
//! intervening delete is flagged so tests can assert the orchestrator never
//! double-creates.

use crate::{
    CreatedResource, Provider, ProviderError, ResourceDescriptor, ResourceHealth, ResourceSpec,
};
use async_trait::async_trait;
use fleet_core::{AgentId, Backend};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One recorded provider invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create { resource_id: String },
    Delete { resource_id: String },
    Get { resource_id: String },
    List,
    GetSecret { name: String },
    SetSecret { name: String },
    PutObject { path: String },
}

#[derive(Debug, Clone)]
struct FakeResource {
    agent_id: Option<AgentId>,
    health: ResourceHealth,
    address: Option<String>,
}

enum ScriptedCreate {
    Fail(ProviderError),
    /// Allocate the resource, then report failure carrying its id.
    FailAfterAllocating(ProviderError),
}

#[derive(Default)]
struct State {
    resources: HashMap<String, FakeResource>,
    secrets: HashMap<String, String>,
    objects: HashMap<String, Vec<u8>>,
    calls: Vec<ProviderCall>,
    create_script: VecDeque<ScriptedCreate>,
    violations: Vec<String>,
    next_ip: u32,
}

#[derive(Clone)]
pub struct FakeProvider {
    backend: Backend,
    state: Arc<Mutex<State>>,
}

impl FakeProvider {
    pub fn new(backend: Backend) -> Self {
        Self { backend, state: Arc::new(Mutex::new(State::default())) }
    }

    /// Script the next create to fail without allocating anything.
    pub fn fail_next_create(&self, err: ProviderError) {
        self.state.lock().create_script.push_back(ScriptedCreate::Fail(err));
    }

    /// Script `n` consecutive transient failures.
    pub fn fail_creates_unavailable(&self, n: usize) {
        let mut state = self.state.lock();
        for _ in 0..n {
            state
                .create_script
                .push_back(ScriptedCreate::Fail(ProviderError::unavailable("scripted outage")));
        }
    }

    /// Script the next create to allocate the resource and then fail,
    /// returning the allocated id as `partial_resource`.
    pub fn fail_next_create_after_allocating(&self, err: ProviderError) {
        self.state.lock().create_script.push_back(ScriptedCreate::FailAfterAllocating(err));
    }

    /// Simulate the resource vanishing out from under the orchestrator
    /// (spot preemption, manual console delete).
    pub fn remove_resource(&self, resource_id: &str) {
        self.state.lock().resources.remove(resource_id);
    }

    /// Plant a live resource the registry knows nothing about (resync tests).
    pub fn plant_resource(&self, resource_id: &str, agent_id: Option<AgentId>) {
        self.state.lock().resources.insert(
            resource_id.to_string(),
            FakeResource {
                agent_id,
                health: ResourceHealth::Running,
                address: Some("10.0.0.99".to_string()),
            },
        );
    }

    pub fn set_health(&self, resource_id: &str, health: ResourceHealth) {
        if let Some(r) = self.state.lock().resources.get_mut(resource_id) {
            r.health = health;
        }
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().calls.clone()
    }

    /// Number of times `create_resource`/`delete_resource` ran for an id.
    pub fn create_count(&self, resource_id: &str) -> usize {
        self.count(|c| matches!(c, ProviderCall::Create { resource_id: r } if r == resource_id))
    }

    pub fn delete_count(&self, resource_id: &str) -> usize {
        self.count(|c| matches!(c, ProviderCall::Delete { resource_id: r } if r == resource_id))
    }

    /// Contract violations observed (duplicate creates). Tests assert empty.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn resource_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.state.lock().resources.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn count(&self, pred: impl Fn(&ProviderCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn create_resource(&self, spec: &ResourceSpec) -> Result<CreatedResource, ProviderError> {
        let mut state = self.state.lock();
        let resource_id = spec.agent_id.to_string();
        state.calls.push(ProviderCall::Create { resource_id: resource_id.clone() });

        if state.resources.contains_key(&resource_id) {
            state
                .violations
                .push(format!("duplicate create for {resource_id} without intervening delete"));
        }

        match state.create_script.pop_front() {
            Some(ScriptedCreate::Fail(err)) => return Err(err),
            Some(ScriptedCreate::FailAfterAllocating(err)) => {
                state.resources.insert(
                    resource_id.clone(),
                    FakeResource {
                        agent_id: Some(spec.agent_id.clone()),
                        health: ResourceHealth::Provisioning,
                        address: None,
                    },
                );
                return Err(err.with_partial(resource_id));
            }
            None => {}
        }

        state.next_ip += 1;
        let address = format!("10.0.0.{}", state.next_ip);
        state.resources.insert(
            resource_id.clone(),
            FakeResource {
                agent_id: Some(spec.agent_id.clone()),
                health: ResourceHealth::Running,
                address: Some(address.clone()),
            },
        );
        Ok(CreatedResource { resource_id, address: Some(address) })
    }

    async fn delete_resource(&self, resource_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Delete { resource_id: resource_id.to_string() });
        state.resources.remove(resource_id);
        Ok(())
    }

    async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<Option<ResourceDescriptor>, ProviderError> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::Get { resource_id: resource_id.to_string() });
        Ok(state.resources.get(resource_id).map(|r| ResourceDescriptor {
            resource_id: resource_id.to_string(),
            agent_id: r.agent_id.clone(),
            health: r.health,
            address: r.address.clone(),
        }))
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::List);
        let mut list: Vec<_> = state
            .resources
            .iter()
            .map(|(id, r)| ResourceDescriptor {
                resource_id: id.clone(),
                agent_id: r.agent_id.clone(),
                health: r.health,
                address: r.address.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(list)
    }

    async fn get_secret(&self, name: &str) -> Result<Option<String>, ProviderError> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::GetSecret { name: name.to_string() });
        Ok(state.secrets.get(name).cloned())
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::SetSecret { name: name.to_string() });
        state.secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn put_object(&self, path: &str, bytes: &[u8]) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::PutObject { path: path.to_string() });
        state.objects.insert(path.to_string(), bytes.to_vec());
        Ok(path.to_string())
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, ProviderError> {
        self.state
            .lock()
            .objects
            .get(path)
            .cloned()
            .ok_or_else(|| ProviderError::rejected(format!("no such object: {path}")))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ProviderError> {
        let mut paths: Vec<_> = self
            .state
            .lock()
            .objects
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn backend(&self) -> Backend {
        self.backend
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake collaborators with call recording for tests

use super::traits::{ReplaceClient, ReplaceError, WatchSink, WatchSource};
use crate::api::{ControllerError, ResourceController};
use crate::event::WatchAction;
use crate::resource::CustomResource;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Recorded call to the user controller
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCall {
    CreateOrUpdate { resource: CustomResource },
    Delete { resource: CustomResource },
}

#[derive(Default)]
struct ControllerState {
    calls: Vec<ControllerCall>,
    mutate_status: bool,
    delete_ready: bool,
    fail_creates: u32,
    fail_deletes: u32,
}

/// Controller fake that records every invocation
///
/// By default `create_or_update_resource` returns `None` and
/// `delete_resource` authorizes release. Behavior is adjustable per test.
#[derive(Clone)]
pub struct RecordingController {
    state: Arc<Mutex<ControllerState>>,
}

impl Default for RecordingController {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerState {
                delete_ready: true,
                ..ControllerState::default()
            })),
        }
    }

    /// Make create/update return a mutated copy with a status patch
    pub fn mutate_status(&self, mutate: bool) {
        self.lock().mutate_status = mutate;
    }

    /// Control the value `delete_resource` returns
    pub fn set_delete_ready(&self, ready: bool) {
        self.lock().delete_ready = ready;
    }

    /// Fail the next `times` create/update calls
    pub fn fail_next_create_or_update(&self, times: u32) {
        self.lock().fail_creates = times;
    }

    /// Fail the next `times` delete calls
    pub fn fail_next_delete(&self, times: u32) {
        self.lock().fail_deletes = times;
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.lock().calls.clone()
    }

    pub fn create_or_update_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, ControllerCall::CreateOrUpdate { .. }))
            .count()
    }

    pub fn delete_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, ControllerCall::Delete { .. }))
            .count()
    }

    /// Most recent resource seen by any call
    pub fn last_seen(&self) -> Option<CustomResource> {
        self.lock().calls.last().map(|call| match call {
            ControllerCall::CreateOrUpdate { resource } => resource.clone(),
            ControllerCall::Delete { resource } => resource.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ResourceController for RecordingController {
    async fn create_or_update_resource(
        &self,
        resource: CustomResource,
    ) -> Result<Option<CustomResource>, ControllerError> {
        let mut state = self.lock();
        state.calls.push(ControllerCall::CreateOrUpdate {
            resource: resource.clone(),
        });
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(ControllerError::failed("injected create/update failure"));
        }
        if state.mutate_status {
            let mut updated = resource;
            updated.status = Some(json!({ "observedGeneration": updated.generation() }));
            return Ok(Some(updated));
        }
        Ok(None)
    }

    async fn delete_resource(&self, resource: CustomResource) -> Result<bool, ControllerError> {
        let mut state = self.lock();
        state.calls.push(ControllerCall::Delete { resource });
        if state.fail_deletes > 0 {
            state.fail_deletes -= 1;
            return Err(ControllerError::failed("injected delete failure"));
        }
        Ok(state.delete_ready)
    }
}

#[derive(Default)]
struct ReplaceState {
    resources: HashMap<String, CustomResource>,
    calls: Vec<CustomResource>,
    fail_conflicts: u32,
    fail_transport: u32,
}

/// In-memory replace client with real optimistic-lock semantics
///
/// Seeded resources carry the authoritative `resourceVersion`; a replace
/// whose version disagrees fails with a conflict, a successful replace bumps
/// the stored version.
#[derive(Clone, Default)]
pub struct FakeReplaceClient {
    state: Arc<Mutex<ReplaceState>>,
}

impl FakeReplaceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite the server-side copy of a resource
    pub fn put(&self, resource: CustomResource) {
        if let Some(uid) = resource.metadata.uid.clone() {
            self.lock().resources.insert(uid, resource);
        }
    }

    /// Current server-side copy, if any
    pub fn get(&self, uid: &str) -> Option<CustomResource> {
        self.lock().resources.get(uid).cloned()
    }

    /// Every payload submitted to `replace_with_lock`, in order
    pub fn calls(&self) -> Vec<CustomResource> {
        self.lock().calls.clone()
    }

    pub fn replace_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Fail the next `times` replaces with an optimistic-lock conflict
    pub fn fail_with_conflict(&self, times: u32) {
        self.lock().fail_conflicts = times;
    }

    /// Fail the next `times` replaces with a transport error
    pub fn fail_with_transport(&self, times: u32) {
        self.lock().fail_transport = times;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplaceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ReplaceClient for FakeReplaceClient {
    async fn replace_with_lock(
        &self,
        resource: &CustomResource,
    ) -> Result<CustomResource, ReplaceError> {
        let mut state = self.lock();
        state.calls.push(resource.clone());

        if state.fail_transport > 0 {
            state.fail_transport -= 1;
            return Err(ReplaceError::Transport("injected transport error".to_string()));
        }
        if state.fail_conflicts > 0 {
            state.fail_conflicts -= 1;
            return Err(ReplaceError::Conflict(resource.qualified_name()));
        }

        let Some(uid) = resource.metadata.uid.clone() else {
            return Err(ReplaceError::Rejected("missing uid".to_string()));
        };
        if let Some(current) = state.resources.get(&uid) {
            if current.metadata.resource_version != resource.metadata.resource_version {
                return Err(ReplaceError::Conflict(resource.qualified_name()));
            }
        }

        let mut stored = resource.clone();
        let next_version = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|version| version.parse::<u64>().ok())
            .map(|version| version + 1)
            .unwrap_or(1);
        stored.metadata.resource_version = Some(next_version.to_string());
        state.resources.insert(uid, stored.clone());
        Ok(stored)
    }
}

/// Scripted watch connection for integration tests
#[derive(Default)]
pub struct FakeWatchSource {
    events: Mutex<VecDeque<(WatchAction, CustomResource)>>,
    close_reason: Mutex<Option<String>>,
}

impl FakeWatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, action: WatchAction, resource: CustomResource) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back((action, resource));
    }

    /// Report an unrecoverable connection fault after the queued events
    pub fn queue_close(&self, reason: impl Into<String>) {
        *self.close_reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }
}

impl WatchSource for FakeWatchSource {
    fn deliver(&self, sink: &dyn WatchSink) {
        let events: Vec<_> = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for (action, resource) in events {
            sink.event_received(action, resource);
        }
        if let Some(reason) = self
            .close_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            sink.connection_closed(&reason);
        }
    }
}

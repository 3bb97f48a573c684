// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation dispatch and the finalizer protocol
//!
//! The state is derived from the event, never stored: the combination of
//! deletion timestamp and finalizer presence decides whether the controller's
//! create/update or delete path runs and whether the result is persisted.
//! The finalizer blocks the API server from dropping a resource before the
//! controller released its external state; it is removed only after the
//! controller authorized the release, in the same replace that persists it.

use crate::adapters::{ReplaceClient, ReplaceError};
use crate::api::{ControllerError, ResourceController};
use crate::event::{ResourceEvent, WatchAction};
use crate::resource::CustomResource;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("controller failed: {0}")]
    Controller(#[from] ControllerError),
    #[error("persisting resource failed: {0}")]
    Replace(#[from] ReplaceError),
}

/// Drives the user controller for one event and persists the outcome
pub struct EventDispatcher {
    controller: Arc<dyn ResourceController>,
    client: Arc<dyn ReplaceClient>,
    finalizer: String,
}

impl EventDispatcher {
    pub fn new(
        controller: Arc<dyn ResourceController>,
        client: Arc<dyn ReplaceClient>,
        finalizer: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            client,
            finalizer: finalizer.into(),
        }
    }

    pub async fn dispatch(&self, event: &ResourceEvent) -> Result<(), DispatchError> {
        let resource = &event.resource;

        if event.action == WatchAction::Deleted {
            // The resource is already gone and never carried a deletion
            // timestamp, so our finalizer never took hold. Clean up
            // opportunistically; there is nothing left to persist.
            tracing::debug!(
                resource = %resource.qualified_name(),
                "resource deleted without finalizer handshake, running delete opportunistically"
            );
            self.controller.delete_resource(resource.clone()).await?;
            return Ok(());
        }

        if resource.is_marked_for_deletion() {
            self.handle_marked_for_deletion(resource).await
        } else {
            self.handle_create_or_update(resource).await
        }
    }

    async fn handle_marked_for_deletion(
        &self,
        resource: &CustomResource,
    ) -> Result<(), DispatchError> {
        if !resource.has_finalizer(&self.finalizer) {
            // Corner case: deletion was requested before we managed to write
            // our finalizer. Clean up but do not persist.
            tracing::debug!(
                resource = %resource.qualified_name(),
                "marked for deletion without our finalizer, running delete opportunistically"
            );
            self.controller.delete_resource(resource.clone()).await?;
            return Ok(());
        }

        let release = self.controller.delete_resource(resource.clone()).await?;
        if !release {
            tracing::debug!(
                resource = %resource.qualified_name(),
                "controller vetoed release, keeping finalizer"
            );
            return Ok(());
        }

        let mut released = resource.clone();
        released.remove_finalizer(&self.finalizer);
        self.client.replace_with_lock(&released).await?;
        tracing::debug!(
            resource = %resource.qualified_name(),
            "finalizer removed, server will complete the deletion"
        );
        Ok(())
    }

    async fn handle_create_or_update(
        &self,
        resource: &CustomResource,
    ) -> Result<(), DispatchError> {
        let mut desired = resource.clone();
        let finalizer_added = desired.add_finalizer(&self.finalizer);

        match self
            .controller
            .create_or_update_resource(desired.clone())
            .await?
        {
            Some(updated) => {
                self.client.replace_with_lock(&updated).await?;
            }
            None if finalizer_added => {
                // Nothing to persist for the controller, but our finalizer
                // write still has to land.
                self.client.replace_with_lock(&desired).await?;
            }
            None => {}
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;

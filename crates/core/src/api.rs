// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller-facing surface: the reconciliation trait and its registration
//! config

use crate::resource::CustomResource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Suffix of the finalizer applied when no override is configured
pub const DEFAULT_FINALIZER_SUFFIX: &str = "finalizer";

/// Failure reported by user reconciliation code
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ControllerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// User-supplied reconciliation logic for one custom resource kind
///
/// Implementations must be deterministic with respect to observable inputs;
/// side effects outside the cluster are the implementor's concern.
#[async_trait]
pub trait ResourceController: Send + Sync + 'static {
    /// Reconcile a created or updated resource. Returning a resource means
    /// the controller mutated it and wants the change persisted; `None`
    /// means no persistence is needed.
    async fn create_or_update_resource(
        &self,
        resource: CustomResource,
    ) -> Result<Option<CustomResource>, ControllerError>;

    /// Release external state for a resource marked for deletion. `true`
    /// authorizes finalizer removal; `false` keeps the finalizer in place
    /// until a later event retriggers the delete path.
    async fn delete_resource(&self, resource: CustomResource) -> Result<bool, ControllerError>;
}

/// Registration surface for one controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Fully qualified CRD name, e.g. `customservices.example.io`
    pub crd_name: String,
    /// Skip events whose generation did not grow past the last admitted one.
    /// Disable for CRDs without meaningful generation semantics.
    #[serde(default = "default_generation_aware")]
    pub generation_aware: bool,
    /// Override for the finalizer tag; defaults to `<crd_name>/finalizer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalizer: Option<String>,
    /// Restrict the controller to a single namespace; `None` watches all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn default_generation_aware() -> bool {
    true
}

impl ControllerConfig {
    pub fn new(crd_name: impl Into<String>) -> Self {
        Self {
            crd_name: crd_name.into(),
            generation_aware: true,
            finalizer: None,
            namespace: None,
        }
    }

    pub fn with_generation_aware(mut self, generation_aware: bool) -> Self {
        self.generation_aware = generation_aware;
        self
    }

    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = Some(finalizer.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// The finalizer tag this controller writes and honors
    pub fn effective_finalizer(&self) -> String {
        self.finalizer
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.crd_name, DEFAULT_FINALIZER_SUFFIX))
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;

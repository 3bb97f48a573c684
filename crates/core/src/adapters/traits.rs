// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter trait definitions for the watch connection and the update client

use crate::event::WatchAction;
use crate::resource::CustomResource;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from replacing a resource on the API server
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// The server-side `resourceVersion` moved since the payload was read
    #[error("optimistic lock conflict replacing {0}")]
    Conflict(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("server rejected replace: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Client that replaces a resource under its optimistic lock
///
/// The replace applies iff the server-side `resourceVersion` matches the
/// submitted one; any other outcome is an error the scheduler retries.
#[async_trait]
pub trait ReplaceClient: Send + Sync + 'static {
    async fn replace_with_lock(
        &self,
        resource: &CustomResource,
    ) -> Result<CustomResource, ReplaceError>;
}

/// Sink side of a watch connection
///
/// The source is expected to reconnect silently and re-emit state;
/// `connection_closed` is invoked only for unrecoverable faults.
pub trait WatchSink: Send + Sync {
    fn event_received(&self, action: WatchAction, resource: CustomResource);
    fn connection_closed(&self, reason: &str);
}

/// Anything that can feed notifications into a sink
pub trait WatchSource {
    fn deliver(&self, sink: &dyn WatchSink);
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watch notifications and the events the scheduler moves through its slots

use crate::resource::{CustomResource, Uid};
use crate::retry::RetryExecution;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action reported by the watch connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchAction {
    Added,
    Modified,
    Deleted,
    Error,
}

impl fmt::Display for WatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchAction::Added => "added",
            WatchAction::Modified => "modified",
            WatchAction::Deleted => "deleted",
            WatchAction::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// A watch notification bound to its own retry execution
///
/// Events have no independent lifetime; they live inside the event store
/// until coalesced, dispatched, or discarded.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub action: WatchAction,
    pub resource: CustomResource,
    pub retry: RetryExecution,
}

impl ResourceEvent {
    pub fn new(action: WatchAction, resource: CustomResource, retry: RetryExecution) -> Self {
        Self {
            action,
            resource,
            retry,
        }
    }

    /// Identity under which this event is coalesced; `None` on malformed input
    pub fn uid(&self) -> Option<Uid> {
        self.resource.uid()
    }

    pub fn generation(&self) -> i64 {
        self.resource.generation()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.resource.resource_version()
    }

    /// Delete-path events are exempt from generation filtering: marking a
    /// resource for deletion does not bump `metadata.generation`
    pub fn is_delete_path(&self) -> bool {
        self.action == WatchAction::Deleted || self.resource.is_marked_for_deletion()
    }
}

impl fmt::Display for ResourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (generation {}, version {})",
            self.action,
            self.resource.qualified_name(),
            self.generation(),
            self.resource_version().unwrap_or("-"),
        )
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

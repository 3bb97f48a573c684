// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator wiring and the dedicated executor loop
//!
//! One worker owns every delayed dispatch: reconciliations for distinct
//! identities are serialized on it, which is what makes the dispatcher safe
//! without per-identity locks. The loop takes the scheduler mutex only for
//! O(1) slot updates; controller calls, replace calls, and timer waits all
//! happen outside it.

use crate::adapters::{ReplaceClient, WatchSink};
use crate::api::{ControllerConfig, ResourceController};
use crate::clock::{Clock, SystemClock};
use crate::dispatcher::EventDispatcher;
use crate::retry::RetryConfig;
use crate::scheduler::{EventScheduler, SchedulerStats};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperatorError {
    /// The watch connection failed unrecoverably. The in-memory queue state
    /// cannot be trusted after this; the embedding process should exit
    /// nonzero and be restarted to re-list.
    #[error("watch connection closed: {0}")]
    WatchClosed(String),
}

/// A registered controller bound to its scheduler and dispatcher
pub struct Operator<C: Clock = SystemClock> {
    scheduler: Arc<EventScheduler<C>>,
    dispatcher: EventDispatcher,
    clock: C,
}

impl Operator<SystemClock> {
    pub fn new(
        config: ControllerConfig,
        retry: RetryConfig,
        controller: Arc<dyn ResourceController>,
        client: Arc<dyn ReplaceClient>,
    ) -> Self {
        Self::with_clock(SystemClock, config, retry, controller, client)
    }
}

impl<C: Clock> Operator<C> {
    pub fn with_clock(
        clock: C,
        config: ControllerConfig,
        retry: RetryConfig,
        controller: Arc<dyn ResourceController>,
        client: Arc<dyn ReplaceClient>,
    ) -> Self {
        let scheduler = EventScheduler::new(clock.clone(), retry, config.generation_aware)
            .with_namespace(config.namespace.clone());
        let dispatcher = EventDispatcher::new(controller, client, config.effective_finalizer());
        Self {
            scheduler: Arc::new(scheduler),
            dispatcher,
            clock,
        }
    }

    /// Sink to hand to the watch connection
    pub fn watch_sink(&self) -> Arc<dyn WatchSink> {
        self.scheduler.clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Run the executor loop until the watch connection fails unrecoverably
    pub async fn run(&self) -> Result<(), OperatorError> {
        loop {
            if let Some(reason) = self.scheduler.closed_reason() {
                tracing::error!(reason = %reason, "shutting down operator");
                return Err(OperatorError::WatchClosed(reason));
            }

            let due = self.scheduler.poll_due(self.clock.now());
            if !due.is_empty() {
                for event in due {
                    tracing::debug!(event = %event, "dispatching reconciliation");
                    match self.dispatcher.dispatch(&event).await {
                        Ok(()) => self.scheduler.processing_succeeded(&event),
                        Err(error) => {
                            tracing::warn!(event = %event, error = %error, "reconciliation failed");
                            self.scheduler.processing_failed(&event);
                        }
                    }
                }
                continue;
            }

            // Register interest before re-reading state so an event landing
            // in between still wakes us.
            let wake = self.scheduler.wake().notified();
            match self.scheduler.next_fire_time() {
                Some(fire_at) => {
                    let delay = fire_at.saturating_duration_since(self.clock.now());
                    tokio::select! {
                        _ = wake => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => wake.await,
            }
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;

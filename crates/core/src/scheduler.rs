// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-identity event scheduling
//!
//! The scheduler turns raw watch notifications into at-most-one in-flight
//! reconciliation per resource identity. Newer notifications overwrite the
//! pending slot of a busy identity, generation-aware mode drops metadata-only
//! changes, and failed dispatches are re-armed with exponential backoff.
//!
//! Every transition of the store runs under one coarse mutex. The mutex is
//! never held across a controller call, a replace call, or a timer wait —
//! only across O(1) store updates.

use crate::adapters::WatchSink;
use crate::clock::Clock;
use crate::event::{ResourceEvent, WatchAction};
use crate::resource::{CustomResource, Uid};
use crate::retry::RetryConfig;
use crate::store::EventStore;
use crate::timer::{TimerQueue, TimerToken};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::Notify;

/// Slot occupancy snapshot, used by callers to observe scheduler health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub under_processing: usize,
    pub not_scheduled: usize,
}

struct SchedulerState {
    store: EventStore,
    timers: TimerQueue,
    /// Currently armed timer per identity; populated iff the identity has an
    /// in-flight event
    armed: HashMap<Uid, TimerToken>,
    closed: Option<String>,
}

/// Coordinates watch events into serialized, retry-aware dispatches
pub struct EventScheduler<C: Clock> {
    state: Mutex<SchedulerState>,
    wake: Notify,
    clock: C,
    retry: RetryConfig,
    generation_aware: bool,
    namespace: Option<String>,
}

impl<C: Clock> EventScheduler<C> {
    pub fn new(clock: C, retry: RetryConfig, generation_aware: bool) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                store: EventStore::new(),
                timers: TimerQueue::new(),
                armed: HashMap::new(),
                closed: None,
            }),
            wake: Notify::new(),
            clock,
            retry,
            generation_aware,
            namespace: None,
        }
    }

    /// Only admit events from the given namespace
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Watch-sink ingress: decide what to do with a notification
    pub fn on_event(&self, action: WatchAction, resource: CustomResource) {
        if action == WatchAction::Error {
            tracing::warn!(
                resource = %resource.qualified_name(),
                "error notification from watch connection, skipping"
            );
            return;
        }
        let Some(uid) = resource.uid() else {
            tracing::warn!(
                resource = %resource.qualified_name(),
                "notification without uid, skipping"
            );
            return;
        };
        if let Some(namespace) = &self.namespace {
            if resource.metadata.namespace.as_deref() != Some(namespace.as_str()) {
                tracing::debug!(
                    resource = %resource.qualified_name(),
                    namespace = %namespace,
                    "notification outside watched namespace, skipping"
                );
                return;
            }
        }

        let event = ResourceEvent::new(action, resource, self.retry.execution());
        let armed = {
            let mut state = self.lock();
            self.admit(&mut state, uid, event)
        };
        if armed {
            self.wake.notify_one();
        }
    }

    /// Fatal watch closure; the executor loop winds down with an error
    pub fn on_close(&self, reason: &str) {
        tracing::error!(reason = %reason, "watch connection closed");
        self.lock().closed = Some(reason.to_string());
        self.wake.notify_one();
    }

    pub fn closed_reason(&self) -> Option<String> {
        self.lock().closed.clone()
    }

    /// Pop every event whose timer is due, handing them to the executor
    pub fn poll_due(&self, now: Instant) -> Vec<ResourceEvent> {
        let mut state = self.lock();
        let fired = state.timers.poll(now);
        let mut due = Vec::with_capacity(fired.len());
        for (uid, token) in fired {
            // A fired entry only counts while its token is still the armed
            // one; anything else is a leftover from cleanup or re-arming.
            if state.armed.get(&uid) == Some(&token) {
                state.armed.remove(&uid);
                if let Some(event) = state.store.under_processing(&uid) {
                    due.push(event.clone());
                }
            }
        }
        due
    }

    /// Earliest armed timer, if any
    pub fn next_fire_time(&self) -> Option<Instant> {
        self.lock().timers.next_fire_time()
    }

    /// Executor callback: the dispatcher finished the event without error
    pub fn processing_succeeded(&self, event: &ResourceEvent) {
        let Some(uid) = event.uid() else { return };
        let armed = {
            let mut state = self.lock();
            state.store.remove_under_processing(&uid);
            match state.store.remove_not_scheduled(&uid) {
                Some(pending) => {
                    tracing::debug!(uid = %uid, "scheduling pending event after success");
                    self.schedule_for_execution(&mut state, uid, pending)
                }
                None => false,
            }
        };
        if armed {
            self.wake.notify_one();
        }
    }

    /// Executor callback: the dispatcher failed; retry or yield to a newer
    /// event
    pub fn processing_failed(&self, event: &ResourceEvent) {
        let Some(uid) = event.uid() else { return };
        let armed = {
            let mut state = self.lock();
            state.store.remove_under_processing(&uid);
            if let Some(pending) = state.store.remove_not_scheduled(&uid) {
                // A newer spec supersedes the failed one; its retry clock
                // starts fresh.
                tracing::debug!(uid = %uid, "processing failed, scheduling the newer pending event");
                self.schedule_for_execution(&mut state, uid, pending)
            } else {
                let retry_event = self.select_event_to_retry(&state, &uid, event);
                tracing::debug!(uid = %uid, "processing failed, rescheduling");
                self.schedule_for_execution(&mut state, uid, retry_event)
            }
        };
        if armed {
            self.wake.notify_one();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.lock();
        SchedulerStats {
            under_processing: state.store.under_processing_count(),
            not_scheduled: state.store.not_scheduled_count(),
        }
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ingress decision procedure; returns whether a timer was armed
    fn admit(&self, state: &mut SchedulerState, uid: Uid, event: ResourceEvent) -> bool {
        tracing::debug!(uid = %uid, event = %event, "event received");

        if event.action == WatchAction::Deleted && event.resource.is_marked_for_deletion() {
            // The server only reports DELETED once every finalizer is gone,
            // so the delete path already ran on an earlier MODIFIED event.
            if state.store.cleanup(&uid) {
                if let Some(token) = state.armed.remove(&uid) {
                    state.timers.cancel(token);
                }
            }
            tracing::debug!(uid = %uid, "deletion timestamp present, finalizer was honored; cleaned up");
            return false;
        }

        if self.generation_aware {
            // Kept for retry refresh: retrying a stale payload after newer
            // notifications would fail on the optimistic lock every time.
            state.store.record_last_event(uid.clone(), event.clone());
        }

        if state.store.contains_not_scheduled(&uid) {
            tracing::debug!(uid = %uid, "replacing pending event with newer payload");
            state.store.add_or_replace_not_scheduled(uid, event);
            return false;
        }

        if self.generation_aware
            && !event.is_delete_path()
            && !state.store.has_larger_generation(&uid, &event)
        {
            tracing::debug!(
                uid = %uid,
                generation = event.generation(),
                last_stored = state.store.last_stored_generation(&uid),
                "generation not larger than last stored, skipping"
            );
            return false;
        }

        if state.store.contains_under_processing(&uid) {
            tracing::debug!(uid = %uid, "event in flight for identity, parking");
            state.store.add_or_replace_not_scheduled(uid, event);
            return false;
        }

        self.schedule_for_execution(state, uid, event)
    }

    /// Arm a timer and promote the event to in-flight; returns false when
    /// the event's retry execution is spent
    fn schedule_for_execution(
        &self,
        state: &mut SchedulerState,
        uid: Uid,
        mut event: ResourceEvent,
    ) -> bool {
        let Some(delay) = event.retry.next_delay() else {
            tracing::warn!(uid = %uid, event = %event, "retry limit reached, discarding event");
            return false;
        };
        let token = state.timers.schedule(uid.clone(), self.clock.now() + delay);
        state.armed.insert(uid.clone(), token);
        tracing::debug!(uid = %uid, delay_ms = delay.as_millis() as u64, "scheduled event for execution");
        state.store.add_under_processing(uid, event);
        true
    }

    /// After a failure with no pending successor, pick the payload to retry:
    /// the freshest observed copy when the resource moved underneath us,
    /// otherwise the failed event with its backoff advanced
    fn select_event_to_retry(
        &self,
        state: &SchedulerState,
        uid: &Uid,
        failed: &ResourceEvent,
    ) -> ResourceEvent {
        if self.generation_aware {
            if let Some(last) = state.store.last_event(uid) {
                if last.resource_version() != failed.resource_version() {
                    tracing::debug!(uid = %uid, "resource moved since failure, retrying with refreshed payload");
                    return last.clone();
                }
            }
        }
        failed.clone()
    }
}

impl<C: Clock> WatchSink for EventScheduler<C> {
    fn event_received(&self, action: WatchAction, resource: CustomResource) {
        self.on_event(action, resource);
    }

    fn connection_closed(&self, reason: &str) {
        self.on_close(reason);
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;

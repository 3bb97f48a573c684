// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Passive per-identity slot map backing the scheduler
//!
//! For each resource identity the store holds at most one in-flight event,
//! at most one pending (coalescing-slot) event, the highest generation ever
//! admitted, and the most recently observed payload for retry refresh. The
//! store exposes no concurrency guarantees of its own; every mutation runs
//! under the scheduler mutex.

use crate::event::ResourceEvent;
use crate::resource::Uid;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct EventStore {
    under_processing: HashMap<Uid, ResourceEvent>,
    not_scheduled: HashMap<Uid, ResourceEvent>,
    last_generation: HashMap<Uid, i64>,
    last_received: HashMap<Uid, ResourceEvent>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every slot for the identity; used when the server reports a
    /// DELETED with the deletion timestamp set, i.e. all finalizers were
    /// already honored. Returns whether an in-flight event was removed so
    /// the caller can cancel its timer.
    pub fn cleanup(&mut self, uid: &Uid) -> bool {
        let had_in_flight = self.under_processing.remove(uid).is_some();
        self.not_scheduled.remove(uid);
        self.last_generation.remove(uid);
        self.last_received.remove(uid);
        had_in_flight
    }

    pub fn contains_under_processing(&self, uid: &Uid) -> bool {
        self.under_processing.contains_key(uid)
    }

    pub fn contains_not_scheduled(&self, uid: &Uid) -> bool {
        self.not_scheduled.contains_key(uid)
    }

    /// Promote an event to in-flight and record its generation
    pub fn add_under_processing(&mut self, uid: Uid, event: ResourceEvent) {
        self.bump_last_generation(&uid, event.generation());
        self.under_processing.insert(uid, event);
    }

    /// Overwrite the coalescing slot; superseded events are discarded
    pub fn add_or_replace_not_scheduled(&mut self, uid: Uid, event: ResourceEvent) {
        self.bump_last_generation(&uid, event.generation());
        self.not_scheduled.insert(uid, event);
    }

    pub fn under_processing(&self, uid: &Uid) -> Option<&ResourceEvent> {
        self.under_processing.get(uid)
    }

    pub fn remove_under_processing(&mut self, uid: &Uid) -> Option<ResourceEvent> {
        self.under_processing.remove(uid)
    }

    pub fn remove_not_scheduled(&mut self, uid: &Uid) -> Option<ResourceEvent> {
        self.not_scheduled.remove(uid)
    }

    /// Cache the most recent payload for generation-aware retry refresh
    pub fn record_last_event(&mut self, uid: Uid, event: ResourceEvent) {
        self.last_received.insert(uid, event);
    }

    pub fn last_event(&self, uid: &Uid) -> Option<&ResourceEvent> {
        self.last_received.get(uid)
    }

    /// Admission predicate for generation-aware mode
    pub fn has_larger_generation(&self, uid: &Uid, event: &ResourceEvent) -> bool {
        event.generation() > self.last_generation.get(uid).copied().unwrap_or(0)
    }

    pub fn last_stored_generation(&self, uid: &Uid) -> Option<i64> {
        self.last_generation.get(uid).copied()
    }

    pub fn under_processing_count(&self) -> usize {
        self.under_processing.len()
    }

    pub fn not_scheduled_count(&self) -> usize {
        self.not_scheduled.len()
    }

    fn bump_last_generation(&mut self, uid: &Uid, generation: i64) {
        let entry = self.last_generation.entry(uid.clone()).or_insert(generation);
        if generation > *entry {
            *entry = generation;
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

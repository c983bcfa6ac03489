// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::Tag;
use crate::tracker::{EntityManager, Track};

/// Per-entity totals.
#[derive(Clone, Debug, Default)]
struct EntityCounts {
    created: usize,
    created_bits: usize,
    created_by_kind: HashMap<String, usize>,
    ingress: usize,
    egress: usize,
    logs: HashMap<log::Level, usize>,
}

struct TrackedState {
    counts: HashMap<Tag, EntityCounts>,
    name_to_tag: HashMap<String, Tag>,
}

impl TrackedState {
    fn new() -> Self {
        Self {
            counts: HashMap::with_capacity(INITIAL_CAPACITY),
            name_to_tag: HashMap::with_capacity(INITIAL_CAPACITY),
        }
    }

    fn counts_mut(&mut self, tag: Tag) -> &mut EntityCounts {
        self.counts.entry(tag).or_default()
    }
}

/// A tracker that accumulates event counts in memory.
///
/// Rather than keeping every event, totals are kept per entity so that long
/// simulations can be summarised cheaply.
pub struct InMemoryTracker {
    entity_manager: EntityManager,
    state: Mutex<TrackedState>,
}

const INITIAL_CAPACITY: usize = 256;

impl InMemoryTracker {
    /// Create a new [`InMemoryTracker`] with an [`EntityManager`].
    pub fn new(entity_manager: EntityManager) -> Self {
        Self {
            entity_manager,
            state: Mutex::new(TrackedState::new()),
        }
    }

    fn with_counts<R>(&self, tag: Tag, f: impl FnOnce(&EntityCounts) -> R) -> Option<R> {
        let guard = self.state.lock().ok()?;
        guard.counts.get(&tag).map(f)
    }

    fn update(&self, tag: Tag, f: impl FnOnce(&mut EntityCounts)) {
        if let Ok(mut guard) = self.state.lock() {
            f(guard.counts_mut(tag));
        }
    }

    /// Get the [`Tag`] for the specified simulation entity.
    pub fn tag_for_name(&self, name: &str) -> Option<Tag> {
        let guard = self.state.lock().ok()?;
        guard.name_to_tag.get(name).copied()
    }

    /// Return the number of objects created by the entity specified by `tag`.
    pub fn created_count(&self, tag: Tag) -> usize {
        self.with_counts(tag, |c| c.created).unwrap_or(0)
    }

    /// Return the number of objects of `kind` created by the entity.
    pub fn created_kind_count(&self, tag: Tag, kind: &str) -> usize {
        self.with_counts(tag, |c| c.created_by_kind.get(kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Return the total modeled bits of all objects created by the entity.
    pub fn created_bits(&self, tag: Tag) -> usize {
        self.with_counts(tag, |c| c.created_bits).unwrap_or(0)
    }

    /// Return the number of objects that entered the entity specified by `tag`.
    pub fn ingress_count(&self, tag: Tag) -> usize {
        self.with_counts(tag, |c| c.ingress).unwrap_or(0)
    }

    /// Return the number of objects that exited the entity specified by `tag`.
    pub fn egress_count(&self, tag: Tag) -> usize {
        self.with_counts(tag, |c| c.egress).unwrap_or(0)
    }

    /// Return the number of log messages emitted by the entity at `level`.
    pub fn log_count(&self, tag: Tag, level: log::Level) -> usize {
        self.with_counts(tag, |c| c.logs.get(&level).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

/// Implementation each [`Track`] event
impl Track for InMemoryTracker {
    fn unique_tag(&self) -> Tag {
        self.entity_manager.unique_tag()
    }

    fn is_entity_enabled(&self, tag: Tag, level: log::Level) -> bool {
        self.entity_manager.is_enabled(tag, level)
    }

    fn add_entity(&self, tag: Tag, entity_name: &str) {
        self.entity_manager.add_entity(tag, entity_name);
        if let Ok(mut guard) = self.state.lock() {
            guard.name_to_tag.insert(entity_name.to_owned(), tag);
        }
    }

    fn enter(&self, tag: Tag, _object: Tag) {
        self.update(tag, |c| c.ingress += 1);
    }

    fn exit(&self, tag: Tag, _object: Tag) {
        self.update(tag, |c| c.egress += 1);
    }

    fn create(&self, created_by: Tag, _tag: Tag, modeled_bits: usize, kind: &str) {
        self.update(created_by, |c| {
            c.created += 1;
            c.created_bits += modeled_bits;
            *c.created_by_kind.entry(kind.to_owned()).or_default() += 1;
        });
    }

    fn destroy(&self, _destroyed_by: Tag, _tag: Tag) {
        // Nothing accumulated
    }

    fn log(&self, tag: Tag, level: log::Level, _msg: std::fmt::Arguments) {
        self.update(tag, |c| *c.logs.entry(level).or_default() += 1);
    }

    fn time(&self, _set_by: Tag, time: u64) {
        self.entity_manager.set_time(time);
    }

    fn shutdown(&self) {
        // Do nothing
    }
}

// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait a number of [`Tracker`]s.

/// Include the /dev/null tracker.
pub mod dev_null;
/// Include the in-memory tracker.
pub mod in_memory;
/// Include the multi-tracker.
pub mod multi_tracker;
/// Include the text-based tracker.
pub mod text;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use dev_null::DevNullTracker;
pub use in_memory::InMemoryTracker;
pub use multi_tracker::MultiTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{ROOT, Tag};

/// Error used to return configuration errors
#[derive(Debug)]
pub struct TrackConfigError(pub String);

impl std::fmt::Display for TrackConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TrackConfigError {}

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global tag
    fn unique_tag(&self) -> Tag;

    /// Determine whether tracking is enabled, and at what level, for an
    /// entity looked up by its tag.
    fn is_entity_enabled(&self, tag: Tag, level: log::Level) -> bool;

    /// Record an entity being created.
    fn add_entity(&self, tag: Tag, entity_name: &str);

    /// Track when an object with the given tag arrives.
    fn enter(&self, enter_into: Tag, enter_obj: Tag);

    /// Track when an object with the given tag leaves.
    fn exit(&self, exit_from: Tag, exit_obj: Tag);

    /// Track when an object with the given tag is created.
    ///
    /// `modeled_bits` is the number of bits the object costs on the simulated
    /// interconnect and `kind` a short name for the type of object.
    fn create(&self, created_by: Tag, created_obj: Tag, modeled_bits: usize, kind: &str);

    /// Track when an object with the given tag is destroyed.
    fn destroy(&self, destroyed_by: Tag, destroyed_obj: Tag);

    /// Track a log message of the given level.
    fn log(&self, msg_by: Tag, level: log::Level, msg: std::fmt::Arguments);

    /// Advance the time to the time specified in cycles.
    fn time(&self, set_by: Tag, time: u64);

    /// Flush any buffered output.
    fn shutdown(&self);
}

/// The type of a [`Tracker`] that is shared across entities.
pub type Tracker = Arc<dyn Track + Send + Sync>;

/// Create a [`Tracker`] that prints all track events at `Warn` and above to
/// `stdout`.
pub fn stdout_tracker() -> Tracker {
    let entity_manager = EntityManager::new(log::Level::Warn);
    let stdout_writer = Box::new(std::io::BufWriter::new(io::stdout()));
    Arc::new(TextTracker::new(entity_manager, stdout_writer))
}

/// Create a [`Tracker`] that suppresses all track events.
pub fn dev_null_tracker() -> Tracker {
    Arc::new(DevNullTracker {})
}

/// The [`EntityManager`] is responsible for determining entity log / trace
/// enable states.
///
/// This manager is also used to allocate unique [`Tag`] values.
pub struct EntityManager {
    /// Level of _log_ events to output.
    default_entity_level: log::Level,

    /// List of regular expressions mapping entity names to log levels.
    regex_to_entity_level: Vec<(Regex, log::Level)>,

    /// Level for each registered entity.
    tag_to_level: Mutex<HashMap<Tag, log::Level>>,

    /// Used to assign unique tags.
    unique_tag: AtomicU64,

    /// Keep track of the current time.
    current_time: AtomicU64,
}

impl EntityManager {
    /// Constructor with the default [`log::Level`]
    #[must_use]
    pub fn new(default_entity_level: log::Level) -> Self {
        Self {
            default_entity_level,
            regex_to_entity_level: Vec::new(),
            tag_to_level: Mutex::new(HashMap::new()),
            unique_tag: AtomicU64::new(ROOT.0 + 1),
            current_time: AtomicU64::new(0),
        }
    }

    fn unique_tag(&self) -> Tag {
        let tag = self.unique_tag.fetch_add(1, Ordering::SeqCst);
        Tag(tag)
    }

    fn level_for(&self, entity_name: &str) -> log::Level {
        for (regex, level) in &self.regex_to_entity_level {
            if regex.is_match(entity_name) {
                return *level;
            }
        }
        self.default_entity_level
    }

    fn add_entity(&self, tag: Tag, entity_name: &str) {
        let level = self.level_for(entity_name);
        if let Ok(mut guard) = self.tag_to_level.lock() {
            guard.insert(tag, level);
        }
    }

    fn is_enabled(&self, tag: Tag, level: log::Level) -> bool {
        let entity_level = match self.tag_to_level.lock() {
            Ok(guard) => guard.get(&tag).copied(),
            Err(_) => None,
        };
        level <= entity_level.unwrap_or(self.default_entity_level)
    }

    /// Add a log filter regular expression.
    ///
    /// The first filter added that matches an entity name has the highest
    /// priority.
    ///
    /// # Example
    ///
    /// ```rust
    /// use shmem_track::tracker::EntityManager;
    /// let mut manager = EntityManager::new(log::Level::Warn);
    /// manager.add_entity_level_filter(".*directory.*", log::Level::Trace).unwrap();
    /// ```
    pub fn add_entity_level_filter(
        &mut self,
        regex_str: &str,
        level: log::Level,
    ) -> Result<(), TrackConfigError> {
        match Regex::new(regex_str) {
            Ok(regex) => {
                self.regex_to_entity_level.push((regex, level));
                Ok(())
            }
            Err(e) => Err(TrackConfigError(format!(
                "Failed to parse regex {regex_str}:\n{e}\n"
            ))),
        }
    }

    fn time(&self) -> u64 {
        self.current_time.load(Ordering::SeqCst)
    }

    fn set_time(&self, new_time: u64) {
        self.current_time.fetch_max(new_time, Ordering::SeqCst);
    }
}

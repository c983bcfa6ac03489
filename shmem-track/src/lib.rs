// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! This module provides combined _track_ capabilities for the shared-memory
//! coherence models.
//!
//! _Track_ means the combination of _log_ and _trace_ where:
//!
//!   - _log_ are text-based human-readable messages emitted at various levels
//!     of verbosity (from `Trace` through to `Error`).
//!   - _trace_ provides a standard set of modelling events that can be emitted.
//!     For example, coherence message creation/destruction or messages
//!     entering/exiting simulation [`Entities`](crate::entity::Entity).
//!
//! All events are emitted through a [`Tracker`] which decides, per entity,
//! whether an event is recorded and where it is written.

// Enable warnings for missing documentation
#![warn(missing_docs)]

use std::str::FromStr;
use std::sync::{Arc, Mutex};

pub use log;

pub mod builder;
pub mod entity;
pub mod tag;

/// Include the trackers.
pub mod tracker;
pub use tracker::{Track, Tracker};

/// A type alias for objects that receive _log_ / _trace_ events.
///
/// The writer must implement Send in order to be shared between threads.
pub type Writer = Box<dyn std::io::Write + Send>;
type SharedWriter = Arc<Mutex<Writer>>;

/// Take a configuration string and convert it to a Level
///
/// Returns `None` if the string is not a valid level name.
#[must_use]
pub fn str_to_level(lvl: &str) -> Option<log::Level> {
    log::Level::from_str(lvl).ok()
}

/// Type used for unique tags
///
/// Each _log_/_trace_ event within the application is given a unique tag to
/// identify it. There are two reserved tag values: [NO_ID](constant.NO_ID.html)
/// and [ROOT](constant.ROOT.html)
pub use tag::Tag;

pub mod test_helpers;

/// Tag value which indicates where there is no valid tag
pub const NO_ID: Tag = tag::Tag(0);

/// The root tag from which all other tags are derived
pub const ROOT: Tag = tag::Tag(1);

/// Track an object entering an entity.
#[macro_export]
macro_rules! enter {
    ($entity:expr ; $enter_tag:expr) => {
        if $crate::Track::is_entity_enabled(&*$entity.tracker, $entity.tag, $crate::log::Level::Trace)
        {
            $crate::Track::enter(&*$entity.tracker, $entity.tag, $enter_tag);
        }
    };
}

/// Track an object leaving an entity.
#[macro_export]
macro_rules! exit {
    ($entity:expr ; $exit_tag:expr) => {
        if $crate::Track::is_entity_enabled(&*$entity.tracker, $entity.tag, $crate::log::Level::Trace)
        {
            $crate::Track::exit(&*$entity.tracker, $entity.tag, $exit_tag);
        }
    };
}

/// Create a unique tag for tracking.
///
/// The user must specify an entity with a [`Tracker`] to create the tag.
#[macro_export]
macro_rules! create_tag {
    ($entity:expr) => {{ $crate::Track::unique_tag(&*$entity.tracker) }};
}

/// Add a creation event.
///
/// With only an entity this records the creation of the entity itself. With
/// an object it records the creation of a tracked object (normally a
/// coherence message) along with its modeled size in bits and its kind name.
#[macro_export]
macro_rules! create {
    ($entity:expr) => {{
        if $crate::Track::is_entity_enabled(&*$entity.tracker, $entity.tag, $crate::log::Level::Trace)
        {
            let parent_tag = match &$entity.parent {
                Some(parent) => parent.tag,
                None => $crate::NO_ID,
            };
            $crate::Track::create(
                &*$entity.tracker,
                parent_tag,
                $entity.tag,
                0,
                $entity.full_name().as_str(),
            );
        }
    }};
    ($entity:expr ; $created_tag:expr, $modeled_bits:expr, $kind:expr) => {{
        if $crate::Track::is_entity_enabled(&*$entity.tracker, $entity.tag, $crate::log::Level::Trace)
        {
            $crate::Track::create(
                &*$entity.tracker,
                $entity.tag,
                $created_tag,
                $modeled_bits,
                $kind,
            );
        }
    }};
}

/// Add a destroy event
#[macro_export]
macro_rules! destroy {
    ($entity:expr) => {{
        if $crate::Track::is_entity_enabled(&*$entity.tracker, $entity.tag, $crate::log::Level::Trace)
        {
            match &$entity.parent {
                Some(parent) => $crate::Track::destroy(&*$entity.tracker, parent.tag, $entity.tag),
                None => $crate::Track::destroy(&*$entity.tracker, $crate::NO_ID, $entity.tag),
            };
        }
    }};
    ($entity:expr ; $destroyed_tag:expr) => {{
        if $crate::Track::is_entity_enabled(&*$entity.tracker, $entity.tag, $crate::log::Level::Trace)
        {
            $crate::Track::destroy(&*$entity.tracker, $entity.tag, $destroyed_tag);
        }
    }};
}

/// Update the current simulated time (in cycles).
#[macro_export]
macro_rules! set_time {
    ($entity:expr ; $time:expr) => {{
        if $crate::Track::is_entity_enabled(&*$entity.tracker, $entity.tag, $crate::log::Level::Trace)
        {
            $crate::Track::time(&*$entity.tracker, $entity.tag, $time);
        }
    }};
}

/// Base macro for log messages of all level.
#[macro_export]
macro_rules! log_base {
    ($entity:expr ; $lvl:expr, $($arg:tt)+) => (
        if $crate::Track::is_entity_enabled(&*$entity.tracker, $entity.tag, $lvl) {
            $crate::Track::log(&*$entity.tracker, $entity.tag, $lvl, format_args!($($arg)+));
        }
    );
}

/// The `trace` macro provides a wrapper for the [`log`](macro.log_base.html)
/// macro at level `log::Level::Trace`
#[macro_export]
macro_rules! trace {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Trace, $($arg)+);
    );
}

/// The `debug` macro provides a wrapper for the [`log`](macro.log_base.html)
/// macro at level `log::Level::Debug`
#[macro_export]
macro_rules! debug {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Debug, $($arg)+);
    );
}

/// The `info` macro provides a wrapper for the [`log`](macro.log_base.html)
/// macro at level `log::Level::Info`
#[macro_export]
macro_rules! info {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Info, $($arg)+);
    );
}

/// The `warn` macro provides a wrapper for the [`log`](macro.log_base.html)
/// macro at level `log::Level::Warn`
#[macro_export]
macro_rules! warn {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Warn, $($arg)+);
    );
}

/// the `error` macro provides a wrapper for the [`log`](macro.log_base.html)
/// macro at level `log::Level::Error`
#[macro_export]
macro_rules! error {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Error, $($arg)+);
    );
}

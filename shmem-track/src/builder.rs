// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Library functions to build trackers as defined by the user.

use std::fs;
use std::io::{self, BufWriter};
use std::sync::Arc;

use crate::tracker::{
    EntityManager, InMemoryTracker, MultiTracker, TextTracker, TrackConfigError,
};
use crate::{Tracker, Writer};

/// Configuration options for an individual tracker.
pub struct TrackerConfig<'a> {
    /// Enable this tracker.
    pub enable: bool,

    /// Set the level at which this tracker should be enabled.
    pub level: log::Level,

    /// A regular expression to match which entities should have this level
    /// applied.
    pub filter_regex: &'a str,

    /// If required, the name of the file to which the tracker will write.
    pub file: Option<&'a str>,
}

impl Default for TrackerConfig<'_> {
    fn default() -> Self {
        Self {
            enable: true,
            level: log::Level::Warn,
            filter_regex: "",
            file: None,
        }
    }
}

/// Configuration options for all tracking.
pub struct TrackersConfig<'a> {
    /// Configuration for stdout.
    pub stdout: TrackerConfig<'a>,

    /// Configuration for a text log file.
    pub log_file: TrackerConfig<'a>,
}

/// The trackers built from a [`TrackersConfig`].
pub struct Trackers {
    /// The tracker that should be handed to the simulation entities.
    pub tracker: Tracker,

    /// Always-present counting tracker used to summarise the simulation.
    pub counts: Arc<InMemoryTracker>,
}

fn build_entity_manager(config: &TrackerConfig) -> Result<EntityManager, TrackConfigError> {
    // With a filter only the matching entities get the requested level
    let default_level = if config.filter_regex.is_empty() {
        config.level
    } else {
        log::Level::Error
    };

    let mut entity_manager = EntityManager::new(default_level);
    if !config.filter_regex.is_empty() {
        entity_manager.add_entity_level_filter(config.filter_regex, config.level)?;
    }
    Ok(entity_manager)
}

/// Create a tracker that prints to stdout
fn build_stdout_tracker(config: &TrackerConfig) -> Result<Tracker, TrackConfigError> {
    let entity_manager = build_entity_manager(config)?;
    let stdout_writer = Box::new(BufWriter::new(io::stdout()));
    Ok(Arc::new(TextTracker::new(entity_manager, stdout_writer)))
}

/// Same as the stdout tracker except that it writes to a file.
fn build_file_tracker(config: &TrackerConfig) -> Result<Tracker, TrackConfigError> {
    let Some(file_name) = config.file else {
        return Err(TrackConfigError(
            "a log file tracker requires a file name".to_string(),
        ));
    };
    let entity_manager = build_entity_manager(config)?;
    let file = fs::File::create(file_name)
        .map_err(|e| TrackConfigError(format!("Unable to create {file_name}: {e}")))?;
    let writer: Writer = Box::new(BufWriter::new(file));
    Ok(Arc::new(TextTracker::new(entity_manager, writer)))
}

/// Set up the stdout/log-file trackers according to the configuration.
///
/// An [`InMemoryTracker`] recording everything at `Trace` level is always
/// included so that message counts are available at the end of the run.
pub fn setup_trackers(config: &TrackersConfig) -> Result<Trackers, TrackConfigError> {
    let counts = Arc::new(InMemoryTracker::new(EntityManager::new(log::Level::Trace)));

    let mut tracker = MultiTracker::default();
    tracker.add_tracker(counts.clone());

    if config.stdout.enable {
        tracker.add_tracker(build_stdout_tracker(&config.stdout)?);
    }
    if config.log_file.enable {
        tracker.add_tracker(build_file_tracker(&config.log_file)?);
    }

    Ok(Trackers {
        tracker: Arc::new(tracker),
        counts,
    })
}

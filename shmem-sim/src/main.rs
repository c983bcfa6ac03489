// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulate tiles sharing memory through a directory.
//!
//! See `lib.rs` for details.

use clap::Parser;
use shmem_protocols::sim_error;
use shmem_protocols::types::SimError;
use shmem_sim::config::{Config, SimConfig};
use shmem_sim::simulation::Simulation;
use shmem_track::builder::{TrackerConfig, TrackersConfig, Trackers, setup_trackers};
use shmem_track::error;

fn setup_all_trackers(config: &SimConfig) -> Result<Trackers, SimError> {
    let trackers_config = TrackersConfig {
        stdout: TrackerConfig {
            enable: config.stdout,
            level: config.stdout_level,
            filter_regex: &config.stdout_filter_regex,
            file: None,
        },
        log_file: TrackerConfig {
            enable: config.log_file.is_some(),
            level: config.log_file_level,
            filter_regex: "",
            file: config.log_file.as_deref(),
        },
    };
    match setup_trackers(&trackers_config) {
        Ok(trackers) => Ok(trackers),
        Err(e) => sim_error!(format!("Tracking: {e}")),
    }
}

fn main() -> Result<(), SimError> {
    let config = Config::parse().layered()?;
    let config = SimConfig::try_from(&config)?;
    let Trackers { tracker, counts } = setup_all_trackers(&config)?;

    let mut simulation = Simulation::new(&tracker, config)?;
    let top = simulation.top.clone();
    if let Err(e) = simulation.run() {
        error!(top ; "{e}");
        error!(top ; "Failed at {}", simulation.now());
        tracker.shutdown();
        return Err(e);
    }

    print!("{}", simulation.summary());
    print!("{}", simulation.message_summary(&counts));
    tracker.shutdown();
    Ok(())
}

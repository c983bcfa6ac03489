// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::sync::Arc;

use shmem_sim::config::{Config, SimConfig};
use shmem_sim::simulation::Simulation;
use shmem_track::Tracker;
use shmem_track::tracker::{EntityManager, InMemoryTracker, dev_null_tracker};

fn sim_config(config: Config) -> SimConfig {
    SimConfig::try_from(&config).unwrap()
}

fn small_config() -> Config {
    Config {
        num_tiles: Some(4),
        accesses_per_tile: Some(200),
        num_shared_lines: Some(8),
        ..Default::default()
    }
}

fn run(config: Config) -> Simulation {
    let mut simulation = Simulation::new(&dev_null_tracker(), sim_config(config)).unwrap();
    simulation.run().unwrap();
    simulation
}

fn total_accesses(simulation: &Simulation) -> usize {
    simulation
        .tiles()
        .iter()
        .map(|tile| tile.l2.metrics().hits + tile.l2.metrics().misses)
        .sum()
}

#[test]
fn all_accesses_complete() {
    let simulation = run(small_config());

    assert_eq!(total_accesses(&simulation), 4 * 200);
    assert_eq!(simulation.directory().num_pending(), 0);
    for tile in simulation.tiles() {
        assert!(tile.is_finished());
        assert_eq!(tile.num_remaining_accesses(), 0);
        assert!(tile.l2.outstanding().is_none());
        assert_eq!(tile.core.handler().num_memory_accesses, 200);
    }
    simulation.check_coherence().unwrap();
}

#[test]
fn same_seed_same_run() {
    let a = run(small_config());
    let b = run(small_config());
    assert_eq!(a.now(), b.now());
    assert_eq!(a.num_events(), b.num_events());
    assert_eq!(a.summary(), b.summary());
}

#[test]
fn small_l2_evicts() {
    let simulation = run(Config {
        l2_capacity_lines: Some(1),
        ..small_config()
    });

    let evictions: usize = simulation
        .tiles()
        .iter()
        .map(|tile| tile.l2.metrics().evictions)
        .sum();
    assert!(evictions > 0);
    for tile in simulation.tiles() {
        assert!(tile.l2.num_lines() <= 1);
    }
    assert!(simulation.directory().metrics().write_backs > 0);
}

#[test]
fn contended_line_is_flushed() {
    let simulation = run(Config {
        num_tiles: Some(4),
        accesses_per_tile: Some(50),
        num_shared_lines: Some(1),
        write_percent: Some(100),
        ..Default::default()
    });

    assert_eq!(total_accesses(&simulation), 4 * 50);
    assert!(simulation.directory().metrics().flushes > 0);
    let owners: Vec<_> = simulation
        .tiles()
        .iter()
        .filter(|tile| tile.l2.num_lines() > 0)
        .collect();
    assert_eq!(owners.len(), 1);
}

#[test]
fn read_only_lines_are_shared() {
    let simulation = run(Config {
        write_percent: Some(0),
        ..small_config()
    });

    let metrics = simulation.directory().metrics();
    assert_eq!(metrics.invalidations, 0);
    assert_eq!(metrics.flushes, 0);
    assert_eq!(metrics.downgrades, 0);
    for tile in simulation.tiles() {
        assert_eq!(tile.l2.metrics().upgrades, 0);
    }
}

#[test]
fn single_tile() {
    let simulation = run(Config {
        num_tiles: Some(1),
        ..small_config()
    });
    assert_eq!(total_accesses(&simulation), 200);
    assert!(simulation.tiles()[0].l2.metrics().hits > 0);
}

#[test]
fn no_accesses() {
    let simulation = run(Config {
        accesses_per_tile: Some(0),
        ..small_config()
    });
    assert_eq!(simulation.now().0, 0);
    assert_eq!(simulation.num_events(), 4);
    assert!(simulation.directory().entries().next().is_none());
}

#[test]
fn messages_are_counted() {
    let counts = Arc::new(InMemoryTracker::new(EntityManager::new(log::Level::Trace)));
    let tracker: Tracker = counts.clone();

    let mut simulation = Simulation::new(&tracker, sim_config(small_config())).unwrap();
    simulation.run().unwrap();

    let summary = simulation.message_summary(&counts);
    assert!(summary.contains("SH_REQ"), "{summary}");
    assert!(summary.contains("SH_REP"), "{summary}");
    assert_eq!(summary.lines().count(), 1 + 4);

    let directory = &simulation.directory().entity;
    assert!(counts.created_bits(directory.tag) > 0);
}

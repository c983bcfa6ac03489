// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulate tiles sharing memory through a directory.
//!
//! Every tile runs a core driven by a random workload of reads and writes to
//! a set of shared lines. Misses in a tile's L2 become coherence requests to
//! the DRAM directory on tile 0, carried over a mesh whose latency depends on
//! the distance travelled and the modelled size of each message.
//!
//! The run fails if the directory ever breaks one of its invariants, if any
//! transaction is left unfinished or if a tile's copy of a line disagrees
//! with the directory at the end.
//!
//! # Examples
//!
//! Running with the defaults and logging to the console:
//! ```text
//! cargo run --bin shmem-sim --release -- --stdout
//! ```
//!
//! Heavy contention on a few lines with small L2s:
//! ```text
//! cargo run --bin shmem-sim --release -- --num-tiles 16 --num-shared-lines 4 --l2-capacity-lines 2 --write-percent 60
//! ```
//!
//! Options can also come from a TOML file given with `--conf-file` and from
//! `SHMEM_`-prefixed environment variables. Command-line options take
//! priority over the environment, which takes priority over the file.

pub mod config;
pub mod event_queue;
pub mod l2_agent;
pub mod mesh;
pub mod simulation;
pub mod workload;

// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulation configuration.
//!
//! Settings are merged from several sources. In increasing priority:
//! 1. The defaults defined by [`Config::default`].
//! 1. A TOML file given by `--conf-file` (or `SHMEM_CONF_FILE`).
//! 1. Environment variables named after the field with a `SHMEM_` prefix,
//!    for example `SHMEM_NUM_TILES`.
//! 1. Command-line arguments.
//!
//! Every field is an `Option` so that sources which do not mention a
//! setting leave the lower priority value in place.

use std::path::{Path, PathBuf};

use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use shmem_protocols::sim_error;
use shmem_protocols::types::SimError;
use shmem_track::str_to_level;

/// Prefix of environment variables read by [`Config::layered`].
pub const ENV_PREFIX: &str = "SHMEM_";

#[derive(Parser, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[command(about = "Simulate tiles sharing memory through a directory coherence protocol")]
pub struct Config {
    /// Number of tiles. Tile 0 also hosts the directory.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_tiles: Option<usize>,

    /// Size of a cache line in bytes.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_size_bytes: Option<usize>,

    /// Width of a physical address in bits.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_address_bits: Option<usize>,

    /// Number of memory accesses made by each tile.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accesses_per_tile: Option<usize>,

    /// Percentage of accesses that are writes.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_percent: Option<u32>,

    /// Number of distinct lines accessed by all tiles.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_shared_lines: Option<usize>,

    /// Seed for the random workload.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Cycles taken by each directory lookup.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_access_cycles: Option<u64>,

    /// Extra cycles when a line has to be fetched from DRAM.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dram_latency_cycles: Option<u64>,

    /// Cycles to move one hop across the mesh.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles_per_hop: Option<u64>,

    /// Fixed cycles added to every message.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles_overhead: Option<u64>,

    /// Bits moved per cycle by a mesh link.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_width_bits: Option<u64>,

    /// Number of lines each private L2 can hold.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l2_capacity_lines: Option<usize>,

    /// Cycles taken by each L2 lookup.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l2_access_cycles: Option<u64>,

    /// Cycles of computation before each memory access.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_cycles: Option<u64>,

    /// Core frequency in GHz.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_frequency_ghz: Option<f64>,

    /// Enable logging to the console.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<bool>,

    /// Level of log message to display.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_level: Option<String>,

    /// Set a regular expression for which entities should have logging level
    /// set to `--stdout-level`. Others will have level set to `Error`.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_filter_regex: Option<String>,

    /// Write the text log to this file. Empty to disable.
    #[arg(short = 'l', long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,

    /// Level of log message written to the log file.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file_level: Option<String>,

    /// Path to additional configuration file
    ///
    /// This additional configuration file must contain TOML, and set values
    /// for fields of this struct.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_tiles: Some(4),
            line_size_bytes: Some(64),
            physical_address_bits: Some(48),
            accesses_per_tile: Some(1000),
            write_percent: Some(30),
            num_shared_lines: Some(32),
            seed: Some(1),
            directory_access_cycles: Some(10),
            dram_latency_cycles: Some(100),
            cycles_per_hop: Some(2),
            cycles_overhead: Some(1),
            link_width_bits: Some(64),
            l2_capacity_lines: Some(16),
            l2_access_cycles: Some(3),
            compute_cycles: Some(5),
            core_frequency_ghz: Some(1.0),
            stdout: Some(false),
            stdout_level: Some("Info".to_string()),
            stdout_filter_regex: Some(String::new()),
            log_file: Some(String::new()),
            log_file_level: Some("Trace".to_string()),
            conf_file: None,
        }
    }
}

fn config_error(e: impl std::fmt::Display) -> SimError {
    SimError(format!("Configuration: {e}"))
}

impl Config {
    /// Merge the defaults, configuration file and environment underneath
    /// the settings given on the command line (`self`).
    pub fn layered(self) -> Result<Config, SimError> {
        let conf_file = self
            .conf_file
            .clone()
            .or_else(|| std::env::var_os(format!("{ENV_PREFIX}CONF_FILE")).map(PathBuf::from))
            .filter(|path| !path.as_os_str().is_empty());

        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(conf_file) = conf_file {
            if !conf_file.is_file() {
                return sim_error!(format!(
                    "Configuration file {} not found",
                    conf_file.display()
                ));
            }
            figment = figment.merge(Toml::file(conf_file));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(self))
            .extract()
            .map_err(config_error)
    }

    /// Load only the defaults and a configuration file.
    pub fn from_file(path: &Path) -> Result<Config, SimError> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(config_error)
    }
}

fn required<T: Clone>(value: &Option<T>, name: &str) -> Result<T, SimError> {
    match value {
        Some(value) => Ok(value.clone()),
        None => sim_error!(format!("Configuration: {name} is not set")),
    }
}

fn level(value: &Option<String>, name: &str) -> Result<log::Level, SimError> {
    let value = required(value, name)?;
    match str_to_level(&value) {
        Some(level) => Ok(level),
        None => sim_error!(format!("Configuration: invalid {name} '{value}'")),
    }
}

/// Validated simulation parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SimConfig {
    pub num_tiles: usize,
    pub line_size_bytes: usize,
    pub physical_address_bits: usize,
    pub accesses_per_tile: usize,
    pub write_percent: u32,
    pub num_shared_lines: usize,
    pub seed: u64,
    pub directory_access_cycles: u64,
    pub dram_latency_cycles: u64,
    pub cycles_per_hop: u64,
    pub cycles_overhead: u64,
    pub link_width_bits: u64,
    pub l2_capacity_lines: usize,
    pub l2_access_cycles: u64,
    pub compute_cycles: u64,
    pub core_frequency_ghz: f64,
    pub stdout: bool,
    pub stdout_level: log::Level,
    pub stdout_filter_regex: String,
    pub log_file: Option<String>,
    pub log_file_level: log::Level,
}

impl TryFrom<&Config> for SimConfig {
    type Error = SimError;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        let log_file = required(&config.log_file, "log_file")?;
        let sim_config = Self {
            num_tiles: required(&config.num_tiles, "num_tiles")?,
            line_size_bytes: required(&config.line_size_bytes, "line_size_bytes")?,
            physical_address_bits: required(
                &config.physical_address_bits,
                "physical_address_bits",
            )?,
            accesses_per_tile: required(&config.accesses_per_tile, "accesses_per_tile")?,
            write_percent: required(&config.write_percent, "write_percent")?,
            num_shared_lines: required(&config.num_shared_lines, "num_shared_lines")?,
            seed: required(&config.seed, "seed")?,
            directory_access_cycles: required(
                &config.directory_access_cycles,
                "directory_access_cycles",
            )?,
            dram_latency_cycles: required(&config.dram_latency_cycles, "dram_latency_cycles")?,
            cycles_per_hop: required(&config.cycles_per_hop, "cycles_per_hop")?,
            cycles_overhead: required(&config.cycles_overhead, "cycles_overhead")?,
            link_width_bits: required(&config.link_width_bits, "link_width_bits")?,
            l2_capacity_lines: required(&config.l2_capacity_lines, "l2_capacity_lines")?,
            l2_access_cycles: required(&config.l2_access_cycles, "l2_access_cycles")?,
            compute_cycles: required(&config.compute_cycles, "compute_cycles")?,
            core_frequency_ghz: required(&config.core_frequency_ghz, "core_frequency_ghz")?,
            stdout: required(&config.stdout, "stdout")?,
            stdout_level: level(&config.stdout_level, "stdout_level")?,
            stdout_filter_regex: required(&config.stdout_filter_regex, "stdout_filter_regex")?,
            log_file: (!log_file.is_empty()).then_some(log_file),
            log_file_level: level(&config.log_file_level, "log_file_level")?,
        };
        sim_config.validate()?;
        Ok(sim_config)
    }
}

impl SimConfig {
    fn validate(&self) -> Result<(), SimError> {
        if self.num_tiles == 0 {
            return sim_error!("Configuration: num_tiles must be at least 1");
        }
        if self.line_size_bytes == 0 || !self.line_size_bytes.is_power_of_two() {
            return sim_error!(format!(
                "Configuration: line_size_bytes must be a power of two, not {}",
                self.line_size_bytes
            ));
        }
        if self.write_percent > 100 {
            return sim_error!(format!(
                "Configuration: write_percent {} is over 100",
                self.write_percent
            ));
        }
        if self.num_shared_lines == 0 {
            return sim_error!("Configuration: num_shared_lines must be at least 1");
        }
        if self.l2_capacity_lines == 0 {
            return sim_error!("Configuration: l2_capacity_lines must be at least 1");
        }
        if self.link_width_bits == 0 {
            return sim_error!("Configuration: link_width_bits must be at least 1");
        }
        if self.core_frequency_ghz <= 0.0 {
            return sim_error!("Configuration: core_frequency_ghz must be positive");
        }
        let line_bits = self.line_size_bytes.trailing_zeros() as usize;
        let needed_bits = line_bits + (usize::BITS - self.num_shared_lines.leading_zeros()) as usize;
        if self.physical_address_bits < needed_bits || self.physical_address_bits > 64 {
            return sim_error!(format!(
                "Configuration: physical_address_bits must be between {needed_bits} and 64"
            ));
        }
        Ok(())
    }
}

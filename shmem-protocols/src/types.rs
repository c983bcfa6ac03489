// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Shared types.

use std::error::Error;
use std::fmt;
use std::ops::Add;

use num_derive::{FromPrimitive, ToPrimitive};

// Simulation errors

#[macro_export]
/// Build a [SimError] from a message that supports `to_string`
macro_rules! sim_error {
    ($msg:expr) => {
        Err($crate::types::SimError($msg.to_string()))?
    };
}

/// The `SimError` is what should be returned in the case of an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimError(pub String);

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl Error for SimError {}

/// The SimResult is the return type for most simulation functions
pub type SimResult = Result<(), SimError>;

/// Identifier of a simulated tile.
pub type TileId = i32;

/// Tile identifier used when no tile applies.
pub const INVALID_TILE_ID: TileId = -1;

/// A physical memory address.
pub type Address = u64;

/// Address used when no address applies.
pub const INVALID_ADDRESS: Address = u64::MAX;

/// Simulated time in cycles.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(pub u64);

impl Time {
    /// The start of simulation.
    pub const ZERO: Time = Time(0);

    /// Number of cycles represented by this time.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.0
    }
}

impl Add<u64> for Time {
    type Output = Time;

    fn add(self, cycles: u64) -> Time {
        Time(self.0.saturating_add(cycles))
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The memory-system component that sends or receives a coherence message.
#[derive(Copy, Clone, Debug, Default, FromPrimitive, PartialEq, Eq, Hash, ToPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum MemComponent {
    #[default]
    Invalid = 0,
    Core,
    L1ICache,
    L1DCache,
    L2Cache,
    DramDirectory,
    DramController,
}

impl fmt::Display for MemComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            MemComponent::Invalid => "INVALID",
            MemComponent::Core => "CORE",
            MemComponent::L1ICache => "L1_ICACHE",
            MemComponent::L1DCache => "L1_DCACHE",
            MemComponent::L2Cache => "L2_CACHE",
            MemComponent::DramDirectory => "DRAM_DIRECTORY",
            MemComponent::DramController => "DRAM_CONTROLLER",
        };
        write!(f, "{name}")
    }
}

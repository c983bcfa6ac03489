// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Directory state for a single memory block.

use std::collections::BTreeSet;
use std::fmt;

use shmem_protocols::sim_error;
use shmem_protocols::types::{Address, SimResult, TileId};

/// Global coherence state of a block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DirectoryState {
    /// No tile holds a valid copy.
    #[default]
    Invalid,

    /// One or more tiles hold a read-only copy.
    Shared,

    /// Exactly one tile holds a writable (possibly dirty) copy.
    Owned,
}

impl fmt::Display for DirectoryState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DirectoryState::Invalid => write!(f, "Invalid"),
            DirectoryState::Shared => write!(f, "Shared"),
            DirectoryState::Owned => write!(f, "Owned"),
        }
    }
}

/// The directory's record for one block.
///
/// The directory also keeps its own copy of the block contents, fetched from
/// the backing store when the block leaves the `Invalid` state and refreshed
/// whenever dirty data is returned.
#[derive(Clone, Debug)]
pub struct DirectoryEntry {
    address: Address,
    state: DirectoryState,
    sharers: BTreeSet<TileId>,
    data: Option<Vec<u8>>,
}

impl DirectoryEntry {
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            state: DirectoryState::Invalid,
            sharers: BTreeSet::new(),
            data: None,
        }
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn state(&self) -> DirectoryState {
        self.state
    }

    /// Tiles holding a copy (the single owner when `Owned`).
    #[must_use]
    pub fn sharers(&self) -> &BTreeSet<TileId> {
        &self.sharers
    }

    #[must_use]
    pub fn has_sharer(&self, tile: TileId) -> bool {
        self.sharers.contains(&tile)
    }

    /// The owning tile, if the block is `Owned`.
    #[must_use]
    pub fn owner(&self) -> Option<TileId> {
        match self.state {
            DirectoryState::Owned => self.sharers.first().copied(),
            _ => None,
        }
    }

    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = Some(data);
    }

    /// Add a reader. Moves an `Invalid` block to `Shared`.
    pub fn add_sharer(&mut self, tile: TileId) -> SimResult {
        if self.state == DirectoryState::Owned {
            return sim_error!(format!(
                "Cannot add sharer {tile} to owned block {:#x}",
                self.address
            ));
        }
        self.sharers.insert(tile);
        self.state = DirectoryState::Shared;
        Ok(())
    }

    /// Remove a holder. The block becomes `Invalid` once nobody holds it.
    pub fn remove_sharer(&mut self, tile: TileId) -> SimResult {
        if !self.sharers.remove(&tile) {
            return sim_error!(format!(
                "Tile {tile} does not hold block {:#x} ({})",
                self.address, self.state
            ));
        }
        if self.sharers.is_empty() {
            self.state = DirectoryState::Invalid;
        }
        Ok(())
    }

    /// Make `tile` the single owner.
    pub fn set_owner(&mut self, tile: TileId) {
        self.sharers.clear();
        self.sharers.insert(tile);
        self.state = DirectoryState::Owned;
    }

    /// Move to `Shared` with exactly the tiles given.
    pub fn make_shared_with(&mut self, tiles: impl IntoIterator<Item = TileId>) {
        self.sharers = tiles.into_iter().collect();
        self.state = if self.sharers.is_empty() {
            DirectoryState::Invalid
        } else {
            DirectoryState::Shared
        };
    }

    /// Drop all holders and the cached copy.
    pub fn invalidate(&mut self) {
        self.sharers.clear();
        self.state = DirectoryState::Invalid;
        self.data = None;
    }

    /// Check that the state and holders agree.
    pub fn check_invariants(&self) -> SimResult {
        let ok = match self.state {
            DirectoryState::Invalid => self.sharers.is_empty(),
            DirectoryState::Shared => !self.sharers.is_empty(),
            DirectoryState::Owned => self.sharers.len() == 1,
        };
        if !ok {
            return sim_error!(format!(
                "Block {:#x} is {} with holders {:?}",
                self.address, self.state, self.sharers
            ));
        }
        if self.state != DirectoryState::Invalid && self.data.is_none() {
            return sim_error!(format!(
                "Block {:#x} is {} but the directory has no copy",
                self.address, self.state
            ));
        }
        Ok(())
    }
}

impl fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x} {} {:?}", self.address, self.state, self.sharers)
    }
}

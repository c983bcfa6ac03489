// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Timing of messages crossing a 2D mesh of tiles.
//!
//! Tiles are laid out row by row on a grid that is as close to square as
//! possible. Messages travel the Manhattan distance between tiles and then
//! take one cycle per `link_width_bits` of modeled message size.

use shmem_protocols::types::TileId;

#[derive(Clone, Debug)]
pub struct Mesh {
    num_columns: usize,
    cycles_per_hop: u64,
    cycles_overhead: u64,
    link_width_bits: u64,
}

impl Mesh {
    #[must_use]
    pub fn new(
        num_tiles: usize,
        cycles_per_hop: u64,
        cycles_overhead: u64,
        link_width_bits: u64,
    ) -> Self {
        let mut num_columns = 1;
        while num_columns * num_columns < num_tiles {
            num_columns += 1;
        }
        Self {
            num_columns,
            cycles_per_hop,
            cycles_overhead,
            link_width_bits: link_width_bits.max(1),
        }
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Returns the (column, row) of a tile.
    #[must_use]
    pub fn position(&self, tile: TileId) -> (usize, usize) {
        let tile = tile.max(0) as usize;
        (tile % self.num_columns, tile / self.num_columns)
    }

    #[must_use]
    pub fn hops(&self, from: TileId, to: TileId) -> u64 {
        let (from_col, from_row) = self.position(from);
        let (to_col, to_row) = self.position(to);
        (from_col.abs_diff(to_col) + from_row.abs_diff(to_row)) as u64
    }

    /// Cycles for a message of `modeled_bits` to go from one tile to
    /// another.
    ///
    /// The fixed overhead means a message between two agents on the same
    /// tile never takes zero cycles.
    #[must_use]
    pub fn latency(&self, from: TileId, to: TileId, modeled_bits: usize) -> u64 {
        let serialization = (modeled_bits as u64).div_ceil(self.link_width_bits);
        self.hops(from, to) * self.cycles_per_hop + self.cycles_overhead + serialization
    }
}

// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Storage behind the directory.

use std::collections::HashMap;

use shmem_protocols::types::Address;

/// Block-granular storage read when a block first becomes cached and
/// written whenever dirty data returns to the directory.
pub trait BackingStore {
    /// Read the block at `address`.
    fn read_block(&mut self, address: Address, num_bytes: usize) -> Vec<u8>;

    /// Replace the contents of the block at `address`.
    fn write_block(&mut self, address: Address, data: &[u8]);
}

/// An in-memory [`BackingStore`] that counts accesses.
///
/// Blocks that have never been written read back as a repeating pattern of
/// their address bytes so that stale data is easy to spot.
#[derive(Default)]
pub struct DramStore {
    blocks: HashMap<Address, Vec<u8>>,
    num_reads: usize,
    num_writes: usize,
}

impl DramStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn num_reads(&self) -> usize {
        self.num_reads
    }

    #[must_use]
    pub fn num_writes(&self) -> usize {
        self.num_writes
    }

    /// Peek at a block without counting an access.
    #[must_use]
    pub fn block(&self, address: Address) -> Option<&[u8]> {
        self.blocks.get(&address).map(Vec::as_slice)
    }

    fn initial_contents(address: Address, num_bytes: usize) -> Vec<u8> {
        address.to_le_bytes().into_iter().cycle().take(num_bytes).collect()
    }
}

impl BackingStore for DramStore {
    fn read_block(&mut self, address: Address, num_bytes: usize) -> Vec<u8> {
        self.num_reads += 1;
        match self.blocks.get(&address) {
            Some(data) => data.clone(),
            None => Self::initial_contents(address, num_bytes),
        }
    }

    fn write_block(&mut self, address: Address, data: &[u8]) {
        self.num_writes += 1;
        self.blocks.insert(address, data.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_see_writes() {
        let mut store = DramStore::new();
        let fresh = store.read_block(0x1122, 4);
        assert_eq!(fresh, vec![0x22, 0x11, 0, 0]);

        store.write_block(0x1122, &[9, 9, 9, 9]);
        assert_eq!(store.read_block(0x1122, 4), vec![9, 9, 9, 9]);
        assert_eq!(store.num_reads(), 2);
        assert_eq!(store.num_writes(), 1);
        assert_eq!(store.block(0x1122), Some(&[9u8, 9, 9, 9][..]));
    }
}

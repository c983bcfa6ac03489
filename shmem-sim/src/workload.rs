// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Random memory traffic over a shared set of lines.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shmem_perf_model::instruction::{BasicBlock, Instruction};
use shmem_protocols::types::Address;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryAccess {
    pub address: Address,
    pub write: bool,
}

impl MemoryAccess {
    /// The basic block executed by a core making this access: some
    /// computation followed by the access itself.
    #[must_use]
    pub fn basic_block(&self, compute_cycles: u64) -> BasicBlock {
        let access = if self.write {
            Instruction::memory_write(self.address, 0)
        } else {
            Instruction::memory_read(self.address, 0)
        };
        BasicBlock::new(vec![Instruction::generic(compute_cycles), access])
    }
}

/// A random access generator.
///
/// Emits `num_to_send` line-aligned accesses to the first `num_lines`
/// lines of memory.
pub struct RandomWorkload {
    line_size_bytes: u64,
    num_lines: u64,
    write_percent: u32,
    num_to_send: usize,

    num_sent: usize,
    rng: StdRng,
}

impl RandomWorkload {
    #[must_use]
    pub fn new(
        seed: u64,
        line_size_bytes: usize,
        num_lines: usize,
        write_percent: u32,
        num_to_send: usize,
    ) -> Self {
        Self {
            line_size_bytes: line_size_bytes as u64,
            num_lines: num_lines.max(1) as u64,
            write_percent: write_percent.min(100),
            num_to_send,
            num_sent: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Iterator for RandomWorkload {
    type Item = MemoryAccess;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sent >= self.num_to_send {
            return None;
        }
        self.num_sent += 1;

        let line = self.rng.gen_range(0..self.num_lines);
        let write = self.rng.gen_range(0..100) < self.write_percent;
        Some(MemoryAccess {
            address: line * self.line_size_bytes,
            write,
        })
    }
}

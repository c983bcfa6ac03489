// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Instructions as seen by the performance model.

use std::fmt;

use shmem_protocols::types::Address;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstructionKind {
    /// Anything that only costs its own cycles.
    Generic,
    MemoryRead { address: Address },
    MemoryWrite { address: Address },
}

/// A single modelled instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub kind: InstructionKind,

    /// Issue cost in cycles, excluding any memory latency.
    pub cost: u64,
}

impl Instruction {
    #[must_use]
    pub fn generic(cost: u64) -> Self {
        Self {
            kind: InstructionKind::Generic,
            cost,
        }
    }

    #[must_use]
    pub fn memory_read(address: Address, cost: u64) -> Self {
        Self {
            kind: InstructionKind::MemoryRead { address },
            cost,
        }
    }

    #[must_use]
    pub fn memory_write(address: Address, cost: u64) -> Self {
        Self {
            kind: InstructionKind::MemoryWrite { address },
            cost,
        }
    }

    /// Returns the kind of dynamic information needed to model this
    /// instruction, if any.
    #[must_use]
    pub fn dynamic_info_kind(&self) -> Option<DynamicInfoKind> {
        match self.kind {
            InstructionKind::Generic => None,
            InstructionKind::MemoryRead { .. } => Some(DynamicInfoKind::MemoryRead),
            InstructionKind::MemoryWrite { .. } => Some(DynamicInfoKind::MemoryWrite),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            InstructionKind::Generic => write!(f, "generic({})", self.cost),
            InstructionKind::MemoryRead { address } => write!(f, "read({address:#x})"),
            InstructionKind::MemoryWrite { address } => write!(f, "write({address:#x})"),
        }
    }
}

/// A run of instructions queued together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BasicBlock {
    instructions: Vec<Instruction>,
}

impl BasicBlock {
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl From<Vec<Instruction>> for BasicBlock {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DynamicInfoKind {
    MemoryRead,
    MemoryWrite,
}

impl fmt::Display for DynamicInfoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicInfoKind::MemoryRead => write!(f, "memory read"),
            DynamicInfoKind::MemoryWrite => write!(f, "memory write"),
        }
    }
}

/// Information only known once an instruction has been executed
/// functionally, such as how long a memory access took.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DynamicInstructionInfo {
    pub kind: DynamicInfoKind,
    pub address: Address,
    pub latency: u64,
}

impl DynamicInstructionInfo {
    #[must_use]
    pub fn memory_read(address: Address, latency: u64) -> Self {
        Self {
            kind: DynamicInfoKind::MemoryRead,
            address,
            latency,
        }
    }

    #[must_use]
    pub fn memory_write(address: Address, latency: u64) -> Self {
        Self {
            kind: DynamicInfoKind::MemoryWrite,
            address,
            latency,
        }
    }
}

impl fmt::Display for DynamicInstructionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:#x} latency {}",
            self.kind, self.address, self.latency
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_memory_instructions_need_info() {
        assert_eq!(Instruction::generic(3).dynamic_info_kind(), None);
        assert_eq!(
            Instruction::memory_read(0x40, 1).dynamic_info_kind(),
            Some(DynamicInfoKind::MemoryRead)
        );
        assert_eq!(
            Instruction::memory_write(0x40, 1).dynamic_info_kind(),
            Some(DynamicInfoKind::MemoryWrite)
        );
    }

    #[test]
    fn display() {
        assert_eq!(Instruction::memory_write(0x80, 0).to_string(), "write(0x80)");
        assert_eq!(
            DynamicInstructionInfo::memory_read(0x40, 12).to_string(),
            "memory read 0x40 latency 12"
        );
    }
}

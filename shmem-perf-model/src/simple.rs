// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! An in-order model: every instruction costs its issue cycles and memory
//! instructions additionally stall for their measured latency.

use shmem_protocols::sim_error;
use shmem_protocols::types::SimError;

use crate::core_perf_model::{CoreContext, HandleInstruction, Handled};
use crate::instruction::{Instruction, InstructionKind};

#[derive(Debug, Default)]
pub struct SimpleHandler {
    pub num_instructions: u64,
    pub num_memory_accesses: u64,
    pub memory_stall_cycles: u64,
}

impl HandleInstruction for SimpleHandler {
    fn handle_instruction(
        &mut self,
        instruction: &Instruction,
        core: &mut CoreContext,
    ) -> Result<Handled, SimError> {
        let mut cycles = instruction.cost;

        if let InstructionKind::MemoryRead { address } | InstructionKind::MemoryWrite { address } =
            instruction.kind
        {
            let Some(info) = core.dynamic_instruction_info()? else {
                return Ok(Handled::InfoNotAvailable);
            };
            if Some(info.kind) != instruction.dynamic_info_kind() || info.address != address {
                return sim_error!(format!("{instruction} cannot be modelled with {info}"));
            }
            core.pop_dynamic_instruction_info()?;
            cycles += info.latency;
            self.num_memory_accesses += 1;
            self.memory_stall_cycles += info.latency;
        }

        core.add_cycles(cycles);
        self.num_instructions += 1;
        Ok(Handled::Done)
    }
}

// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The performance model of a single core.
//!
//! Functional execution runs ahead of the model: it queues the basic blocks
//! it executes and, as instructions complete, pushes the dynamic
//! information (such as memory latencies) the model needs. [`iterate`]
//! then consumes as much as it can. When an instruction needs information
//! that has not arrived yet it returns [`IterateResult::Suspended`] and the
//! next call resumes from that instruction.
//!
//! The last queued basic block is never consumed by [`iterate`] as it may
//! still be growing. Queue an empty block to flush it.
//!
//! [`iterate`]: CorePerfModel::iterate

use std::collections::VecDeque;
use std::fmt::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use shmem_protocols::sim_error;
use shmem_protocols::types::{SimError, SimResult};
use shmem_track::entity::Entity;
use shmem_track::{debug, trace};

use crate::instruction::{BasicBlock, DynamicInstructionInfo, Instruction};

/// Bound on dynamic information waiting to be consumed. Reaching it means
/// the model is not keeping up with functional execution.
pub const MAX_DYNAMIC_INFO_QUEUE: usize = 5000;

/// Outcome of handling a single instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Handled {
    Done,

    /// The instruction is skipped and modelling moves on to the next one.
    Abort,

    /// The dynamic information needed is not available yet.
    InfoNotAvailable,
}

/// Outcome of [`CorePerfModel::iterate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IterateResult {
    /// Every complete basic block has been modelled.
    Completed,

    /// Modelling stopped at instruction `index` of the oldest queued basic
    /// block and will restart there.
    Suspended { index: usize },
}

/// Models the cost of individual instructions.
pub trait HandleInstruction {
    fn handle_instruction(
        &mut self,
        instruction: &Instruction,
        core: &mut CoreContext,
    ) -> Result<Handled, SimError>;
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, SimError> {
    mutex
        .lock()
        .map_err(|e| SimError(format!("Performance model queue poisoned: {e}")))
}

/// The state of a core visible to a [`HandleInstruction`].
#[derive(Debug, Default)]
pub struct CoreContext {
    cycle_count: u64,
    dynamic_info: Mutex<VecDeque<DynamicInstructionInfo>>,
}

impl CoreContext {
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn add_cycles(&mut self, cycles: u64) {
        self.cycle_count += cycles;
    }

    /// Returns the oldest dynamic information without consuming it.
    pub fn dynamic_instruction_info(&self) -> Result<Option<DynamicInstructionInfo>, SimError> {
        Ok(lock(&self.dynamic_info)?.front().copied())
    }

    pub fn pop_dynamic_instruction_info(&self) -> SimResult {
        match lock(&self.dynamic_info)?.pop_front() {
            Some(_) => Ok(()),
            None => sim_error!("Expected some dynamic info to be available"),
        }
    }

    fn push_dynamic_instruction_info(&self, info: DynamicInstructionInfo) -> SimResult {
        let mut queue = lock(&self.dynamic_info)?;
        if queue.len() >= MAX_DYNAMIC_INFO_QUEUE {
            return sim_error!(format!(
                "Dynamic info queue is growing too big ({} entries)",
                queue.len()
            ));
        }
        queue.push_back(info);
        Ok(())
    }

    fn num_dynamic_info(&self) -> Result<usize, SimError> {
        Ok(lock(&self.dynamic_info)?.len())
    }
}

pub struct CorePerfModel<H>
where
    H: HandleInstruction,
{
    pub entity: Arc<Entity>,
    handler: H,
    core: CoreContext,
    basic_blocks: Mutex<VecDeque<BasicBlock>>,

    /// Position reached within the oldest basic block.
    current_ins_index: usize,
    enabled: bool,

    /// Current frequency in GHz.
    frequency: f64,
    average_frequency: f64,

    /// Time in ns covered by `average_frequency`.
    total_time: f64,
    checkpointed_cycle_count: u64,
}

impl<H> CorePerfModel<H>
where
    H: HandleInstruction,
{
    /// Create a disabled model running at `frequency` GHz.
    pub fn new(parent: &Arc<Entity>, name: &str, frequency: f64, handler: H) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, name)),
            handler,
            core: CoreContext::default(),
            basic_blocks: Mutex::new(VecDeque::new()),
            current_ins_index: 0,
            enabled: false,
            frequency,
            average_frequency: 0.0,
            total_time: 0.0,
            checkpointed_cycle_count: 0,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Queue a basic block. Ignored while the model is disabled.
    pub fn queue_basic_block(&self, block: BasicBlock) -> SimResult {
        if !self.enabled {
            return Ok(());
        }
        lock(&self.basic_blocks)?.push_back(block);
        Ok(())
    }

    /// Queue a single instruction as a basic block of its own.
    pub fn queue_dynamic_instruction(&self, instruction: Instruction) -> SimResult {
        self.queue_basic_block(BasicBlock::new(vec![instruction]))
    }

    pub fn push_dynamic_instruction_info(&self, info: DynamicInstructionInfo) -> SimResult {
        if !self.enabled {
            return Ok(());
        }
        trace!(self.entity ; "push {info}");
        self.core.push_dynamic_instruction_info(info)
    }

    pub fn pop_dynamic_instruction_info(&self) -> SimResult {
        if !self.enabled {
            return Ok(());
        }
        self.core.pop_dynamic_instruction_info()
    }

    /// Model every complete basic block that is queued.
    pub fn iterate(&mut self) -> Result<IterateResult, SimError> {
        let blocks = self
            .basic_blocks
            .get_mut()
            .map_err(|e| SimError(format!("Performance model queue poisoned: {e}")))?;

        while blocks.len() > 1 {
            let Some(block) = blocks.front() else {
                break;
            };

            while let Some(instruction) = block.get(self.current_ins_index) {
                match self
                    .handler
                    .handle_instruction(instruction, &mut self.core)?
                {
                    Handled::Done => {}
                    Handled::Abort => {
                        trace!(self.entity ; "abort {instruction}");
                    }
                    Handled::InfoNotAvailable => {
                        trace!(self.entity ; "{instruction} waiting for dynamic info");
                        return Ok(IterateResult::Suspended {
                            index: self.current_ins_index,
                        });
                    }
                }
                self.current_ins_index += 1;
            }

            blocks.pop_front();
            self.current_ins_index = 0;
        }
        Ok(IterateResult::Completed)
    }

    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.core.cycle_count
    }

    /// Restart cycle counting, e.g. when a thread starts on this core.
    pub fn set_cycle_count(&mut self, cycle_count: u64) {
        self.checkpointed_cycle_count = cycle_count;
        self.core.cycle_count = cycle_count;
    }

    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    #[must_use]
    pub fn average_frequency(&self) -> f64 {
        self.average_frequency
    }

    pub fn update_frequency(&mut self, frequency: f64) {
        self.recompute_average_frequency();
        debug!(self.entity ; "frequency {} -> {frequency} GHz", self.frequency);
        self.frequency = frequency;
    }

    /// Fold the cycles run since the last checkpoint into the average
    /// frequency.
    pub fn recompute_average_frequency(&mut self) {
        let cycles_elapsed =
            self.core.cycle_count.saturating_sub(self.checkpointed_cycle_count) as f64;
        let total_cycles = self.average_frequency * self.total_time + cycles_elapsed;
        let total_time = self.total_time + cycles_elapsed / self.frequency;

        if total_time > 0.0 {
            self.average_frequency = total_cycles / total_time;
        }
        self.total_time = total_time;
        self.checkpointed_cycle_count = self.core.cycle_count;
    }

    /// Time in ns to run the cycles counted so far at the current frequency.
    #[must_use]
    pub fn completion_time_ns(&self) -> u64 {
        (self.core.cycle_count as f64 / self.frequency) as u64
    }

    #[must_use]
    pub fn num_queued_basic_blocks(&self) -> usize {
        lock(&self.basic_blocks).map_or(0, |blocks| blocks.len())
    }

    #[must_use]
    pub fn num_dynamic_info(&self) -> usize {
        self.core.num_dynamic_info().unwrap_or(0)
    }

    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "{}", self.entity);
        let _ = writeln!(s, "   Cycles: {}", self.core.cycle_count);
        let _ = writeln!(s, "   Completion Time: {} ns", self.completion_time_ns());
        let _ = writeln!(s, "   Average Frequency: {:.3} GHz", self.average_frequency);
        s
    }
}

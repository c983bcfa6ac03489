// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Per-core performance models.
//!
//! A [`CorePerfModel`](core_perf_model::CorePerfModel) consumes the basic
//! blocks executed by a core and the dynamic information produced as those
//! instructions complete, counting the cycles the core would have taken.
//!
//! ```
//! use shmem_perf_model::core_perf_model::{CorePerfModel, IterateResult};
//! use shmem_perf_model::instruction::{BasicBlock, DynamicInstructionInfo, Instruction};
//! use shmem_perf_model::simple::SimpleHandler;
//! use shmem_track::entity::toplevel;
//! use shmem_track::tracker::dev_null_tracker;
//!
//! let top = toplevel(&dev_null_tracker(), "top");
//! let mut model = CorePerfModel::new(&top, "core", 1.0, SimpleHandler::default());
//! model.enable();
//!
//! let block = vec![Instruction::generic(2), Instruction::memory_read(0x40, 1)];
//! model.queue_basic_block(block.into()).unwrap();
//! model.queue_basic_block(BasicBlock::default()).unwrap();
//! assert_eq!(model.iterate().unwrap(), IterateResult::Suspended { index: 1 });
//!
//! model
//!     .push_dynamic_instruction_info(DynamicInstructionInfo::memory_read(0x40, 20))
//!     .unwrap();
//! assert_eq!(model.iterate().unwrap(), IterateResult::Completed);
//! assert_eq!(model.cycle_count(), 23);
//! ```

pub mod core_perf_model;
pub mod instruction;
pub mod simple;

//! Builder module: low-level bytecode construction.
//!
//! The builder hands out registers, validates and records instructions, and
//! manages scratch selection registers. Higher-level lowering lives in the
//! compiler, which allocates column and index registers through the
//! register cache rather than directly.

use crate::bytecode::{Instruction, OutputColumn, Program};
use crate::registers::{RegisterLayout, RegisterType, RwHandle, Selection};
use crate::{Result, TraceframeError};
use tracing::trace;

/// Default ceiling on registers per program.
pub const DEFAULT_REGISTER_LIMIT: usize = 1 << 16;

/// A scratch selection register handed out by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchRegister {
    pub selection: RwHandle<Selection>,
}

#[derive(Debug)]
struct ScratchSlot {
    size: usize,
    selection: RwHandle<Selection>,
    in_use: bool,
}

/// Single-use builder for one program.
#[derive(Debug)]
pub struct BytecodeBuilder {
    instructions: Vec<Instruction>,
    layout: RegisterLayout,
    register_limit: usize,
    scratch_slots: Vec<ScratchSlot>,
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTER_LIMIT)
    }
}

impl BytecodeBuilder {
    pub fn new(register_limit: usize) -> Self {
        Self {
            instructions: Vec::new(),
            layout: RegisterLayout::default(),
            register_limit,
            scratch_slots: Vec::new(),
        }
    }

    /// Allocates a new register of kind `T`.
    ///
    /// Fails with `PlanTooLarge` once the register ceiling is reached.
    pub fn allocate_register<T: RegisterType>(&mut self) -> Result<RwHandle<T>> {
        if self.layout.len() >= self.register_limit {
            return Err(TraceframeError::PlanTooLarge(format!(
                "program needs more than {} registers",
                self.register_limit
            )));
        }
        let index = self.layout.push(T::KIND);
        trace!(register = index, kind = ?T::KIND, "allocated register");
        Ok(RwHandle::new(index))
    }

    pub fn register_count(&self) -> usize {
        self.layout.len()
    }

    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    /// Appends an instruction.
    ///
    /// Every register the instruction touches must already be allocated with
    /// the kind the instruction expects. A violation is a compiler bug and
    /// fails the compilation with `ContractViolation`.
    pub fn emit(&mut self, instruction: Instruction) -> Result<()> {
        for (kind, index) in instruction.registers() {
            match self.layout.kind(index) {
                Some(found) if found == kind => {}
                Some(found) => {
                    return Err(TraceframeError::ContractViolation(format!(
                        "{} uses r{} as {:?} but it was allocated as {:?}",
                        instruction.name(),
                        index,
                        kind,
                        found
                    )))
                }
                None => {
                    return Err(TraceframeError::ContractViolation(format!(
                        "{} references unallocated register r{}",
                        instruction.name(),
                        index
                    )))
                }
            }
        }
        self.instructions.push(instruction);
        Ok(())
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Gets or creates a scratch selection register able to hold `size`
    /// rows, best fit: the smallest free slot with room for `size`.
    ///
    /// Does not emit the initializing instruction; see `allocate_scratch`.
    pub fn get_or_create_scratch(&mut self, size: usize) -> Result<ScratchRegister> {
        if let Some(slot) = self.find_best_fit(size) {
            let slot = &self.scratch_slots[slot];
            return Ok(ScratchRegister { selection: slot.selection });
        }
        let selection = self.allocate_register::<Selection>()?;
        self.scratch_slots.push(ScratchSlot { size, selection, in_use: false });
        Ok(ScratchRegister { selection })
    }

    /// Best-fit scratch allocation that also emits the `InitSelection`
    /// resetting the register, and marks the slot in use.
    pub fn allocate_scratch(&mut self, size: usize) -> Result<ScratchRegister> {
        let scratch = self.get_or_create_scratch(size)?;
        self.emit(Instruction::InitSelection {
            len: size,
            value: false,
            dest: scratch.selection,
        })?;
        self.mark_scratch_in_use(scratch)?;
        Ok(scratch)
    }

    pub fn mark_scratch_in_use(&mut self, scratch: ScratchRegister) -> Result<()> {
        let slot = self.find_slot(scratch).ok_or_else(|| {
            TraceframeError::ContractViolation(format!(
                "r{} is not a scratch register",
                scratch.selection.index
            ))
        })?;
        self.scratch_slots[slot].in_use = true;
        Ok(())
    }

    pub fn release_scratch(&mut self, scratch: ScratchRegister) {
        if let Some(slot) = self.find_slot(scratch) {
            self.scratch_slots[slot].in_use = false;
        }
    }

    pub fn is_scratch_in_use(&self, scratch: ScratchRegister) -> bool {
        self.find_slot(scratch).is_some_and(|slot| self.scratch_slots[slot].in_use)
    }

    /// Finishes the program. Consumes the builder.
    pub fn finalize(self, outputs: Vec<OutputColumn>, row_count: usize) -> Program {
        Program::new(self.instructions, self.layout, outputs, row_count)
    }

    fn find_best_fit(&self, size: usize) -> Option<usize> {
        self.scratch_slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.in_use && slot.size >= size)
            .min_by_key(|(_, slot)| slot.size)
            .map(|(i, _)| i)
    }

    fn find_slot(&self, scratch: ScratchRegister) -> Option<usize> {
        self.scratch_slots
            .iter()
            .position(|slot| slot.selection == scratch.selection)
    }
}

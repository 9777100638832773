use crate::graph;
use crate::il::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A basic block.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Block {
    /// The index of the block within its `ControlFlowGraph`.
    index: usize,
    /// An internal counter for the next block-unique instruction.
    next_instruction_index: u64,
    /// The instructions for this block.
    instructions: Vec<Instruction>,
}

impl Block {
    pub(crate) fn new(index: usize) -> Block {
        Block {
            index,
            next_instruction_index: 0,
            instructions: Vec::new(),
        }
    }

    fn new_instruction_index(&mut self) -> u64 {
        let instruction_index = self.next_instruction_index;
        self.next_instruction_index = instruction_index + 1;
        instruction_index
    }

    fn push(&mut self, operation: Operation, address: Option<u64>) {
        let index = self.new_instruction_index();
        let mut instruction = Instruction::new(index, operation);
        instruction.set_address(address);
        self.instructions.push(instruction);
    }

    /// Returns the index of this block.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns this block's instructions, in execution order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns the instruction with the given block-unique index.
    pub fn instruction(&self, index: u64) -> Result<&Instruction, crate::Error> {
        self.instructions
            .iter()
            .find(|instruction| instruction.index() == index)
            .ok_or(crate::Error::InstructionNotFound(index))
    }

    /// The last instruction in this block, when the block is non-empty.
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// The address of the first instruction in this block, when known.
    pub fn address(&self) -> Option<u64> {
        self.instructions
            .first()
            .and_then(|instruction| instruction.address())
    }

    /// Adds an assign operation to the end of this block.
    pub fn assign(&mut self, dst: Scalar, src: Expression, address: Option<u64>) {
        self.push(Operation::assign(dst, src), address);
    }

    /// Adds a store operation to the end of this block.
    pub fn store(&mut self, address_expr: Expression, src: Expression, address: Option<u64>) {
        self.push(Operation::store(address_expr, src), address);
    }

    /// Adds a load operation to the end of this block.
    pub fn load(&mut self, dst: Scalar, address_expr: Expression, address: Option<u64>) {
        self.push(Operation::load(dst, address_expr), address);
    }

    /// Adds an indirect branch operation to the end of this block.
    pub fn branch(&mut self, target: Expression, address: Option<u64>) {
        self.push(Operation::branch(target), address);
    }

    /// Adds an intrinsic operation to the end of this block.
    pub fn intrinsic<S: Into<String>>(&mut self, name: S, address: Option<u64>) {
        self.push(Operation::intrinsic(name), address);
    }

    /// Adds a nop operation to the end of this block.
    pub fn nop(&mut self, address: Option<u64>) {
        self.push(Operation::nop(), address);
    }

    /// Appends an instruction from another block, renumbering it for this
    /// block. The operation, address, and comment are preserved.
    pub fn adopt(&mut self, instruction: &Instruction) {
        let index = self.new_instruction_index();
        self.instructions.push(instruction.clone_new_index(index));
    }

    /// Removes and returns every instruction from the given position
    /// onwards. Used when a jump target lands in the middle of this block
    /// and it must be split.
    pub fn split_off(&mut self, position: usize) -> Vec<Instruction> {
        self.instructions.split_off(position)
    }
}

impl graph::Vertex for Block {
    fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "[ Block: 0x{:X} ]", self.index)?;
        for instruction in self.instructions() {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

//! Condor is a control-flow-recovery engine for binary translation.
//!
//! Condor takes a memory image and an external translator, and recovers a
//! control-flow graph for the code in the image. The translator lifts
//! instructions into Condor IL one block at a time; Condor decides which
//! addresses to explore, splits blocks when a jump lands in the middle of
//! already-translated code, and models unresolved indirect jumps with a
//! synthetic dispatcher block that is rewritten into direct edges wherever
//! the jump destination is statically known.
//!
//! The main entry point is [`recovery::ExplorationDriver`].

#[macro_use]
extern crate log;

pub mod architecture;
pub mod graph;
pub mod il;
pub mod loader;
pub mod memory;
pub mod recovery;
mod tests;
pub mod types;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Custom error: {0}")]
    Custom(String),

    #[error("Vertex does not exist: {0}")]
    GraphVertexNotFound(usize),

    #[error("Edge does not exist: (0x{0:X}->0x{1:X})")]
    GraphEdgeNotFound(usize, usize),

    #[error("Vertex already exists: {0}")]
    GraphDuplicateVertex(usize),

    #[error("Edge already exists: (0x{0:X}->0x{1:X})")]
    GraphDuplicateEdge(usize, usize),

    #[error("Edge endpoint does not exist: (0x{0:X}->0x{1:X})")]
    GraphDanglingEdge(usize, usize),

    #[error("Sort error, bitness of expressions differ")]
    Sort,

    #[error("Instruction does not exist in block: {0}")]
    InstructionNotFound(u64),

    #[error("Segment at 0x{0:X} is empty")]
    EmptySegment(u64),

    #[error("File is not a valid Elf")]
    InvalidElf,

    #[error("Goblin error: {0}")]
    Goblin(#[from] goblin::error::Error),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&str> for Error {
    fn from(error: &str) -> Error {
        Error::Custom(error.to_string())
    }
}

impl From<String> for Error {
    fn from(error: String) -> Error {
        Error::Custom(error)
    }
}

//! Facts about the input architecture.
//!
//! Condor never decodes instructions, but the recovery engine still needs a
//! handful of facts about the architecture the image was compiled for: how
//! instructions are aligned, how wide a code pointer is, whether branches
//! have a delay slot, and which IL scalar models the program counter. These
//! are supplied once, up front, and are read-only afterwards.

use crate::il::{self, Scalar};
use crate::types::Endian;
use serde::{Deserialize, Serialize};

/// Static facts about an input architecture.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Architecture {
    name: String,
    endian: Endian,
    instruction_alignment: u64,
    delay_slot_size: u64,
    pointer_bits: usize,
    pc: Scalar,
}

impl Architecture {
    pub fn new<S: Into<String>>(
        name: S,
        endian: Endian,
        instruction_alignment: u64,
        delay_slot_size: u64,
        pointer_bits: usize,
        pc: Scalar,
    ) -> Architecture {
        assert!(instruction_alignment > 0, "instruction alignment must be non-zero");
        Architecture {
            name: name.into(),
            endian,
            instruction_alignment,
            delay_slot_size,
            pointer_bits,
            pc,
        }
    }

    /// The 32-bit big-endian Mips architecture.
    pub fn mips() -> Architecture {
        Architecture::new("mips", Endian::Big, 4, 4, 32, il::scalar("$pc", 32))
    }

    /// The 32-bit little-endian Mips architecture.
    pub fn mipsel() -> Architecture {
        Architecture::new("mipsel", Endian::Little, 4, 4, 32, il::scalar("$pc", 32))
    }

    /// The 32-bit X86 architecture.
    pub fn x86() -> Architecture {
        Architecture::new("x86", Endian::Little, 1, 0, 32, il::scalar("eip", 32))
    }

    /// The 64-bit X86 architecture.
    pub fn amd64() -> Architecture {
        Architecture::new("amd64", Endian::Little, 1, 0, 64, il::scalar("rip", 64))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// The value instruction addresses must be aligned to.
    pub fn instruction_alignment(&self) -> u64 {
        self.instruction_alignment
    }

    /// The size in bytes of the delay slot, or 0 if the architecture has
    /// none. The instruction in a delay slot executes before the effect of
    /// the branch preceding it, so translators must include it when
    /// computing the fallthrough program counter.
    pub fn delay_slot_size(&self) -> u64 {
        self.delay_slot_size
    }

    /// The width of a code pointer in bits.
    pub fn pointer_bits(&self) -> usize {
        self.pointer_bits
    }

    /// The scalar modeling the program counter.
    pub fn pc(&self) -> &Scalar {
        &self.pc
    }

    pub fn is_pc_register(&self, scalar: &Scalar) -> bool {
        *scalar == self.pc
    }

    pub fn is_instruction_aligned(&self, address: u64) -> bool {
        address % self.instruction_alignment == 0
    }
}

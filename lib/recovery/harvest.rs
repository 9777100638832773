//! Harvests plausible code pointers from the image's data.
//!
//! The harvester scans every readable segment for pointer-width values that
//! look like instruction addresses and seeds the registry with them as
//! unreliable jump targets. It is a pure heuristic: false positives become
//! unreachable blocks for a later reachability pass to prune, and false
//! negatives are narrowed by [`TableRecognizer`]s which inspect translated
//! blocks for jump-table access patterns and enumerate the table entries
//! directly.

use crate::architecture::Architecture;
use crate::il::{Block, Expression, Operation};
use crate::memory::Image;
use crate::recovery::{JumpTargetRegistry, JumpTargetReason};

/// Scan every readable segment for plausible code pointers, feeding each
/// into the registry as an unreliable target. Returns the number of
/// candidates registered.
///
/// The driver runs this at most once per segment set, so harvesting cannot
/// re-trigger itself and exploration terminates once translation stops
/// adding entries.
pub fn harvest_image(
    registry: &mut JumpTargetRegistry,
    image: &Image,
    architecture: &Architecture,
) -> usize {
    let stride = (architecture.pointer_bits() / 8) as u64;
    let mut harvested = 0;

    for segment in image.segments().values() {
        if !segment.is_readable() {
            continue;
        }
        let mut address = segment.address();
        while address + stride <= segment.end() {
            if let Some(value) = image.get_pointer(address, architecture.pointer_bits()) {
                if registry.is_interesting(value) {
                    trace!("harvested code pointer 0x{:x} at 0x{:x}", value, address);
                    registry.materialize(value, false, JumpTargetReason::GLOBAL_DATA);
                    harvested += 1;
                }
            }
            address += stride;
        }
    }

    debug!("harvested {} code pointers from global data", harvested);
    harvested
}

/// Recognizes architecture- or ABI-specific jump-table patterns in a
/// translated block and enumerates their entries as extra jump-target
/// candidates.
pub trait TableRecognizer {
    /// Inspect a translated block and return any table entries found. The
    /// driver feeds each returned address into the registry as an
    /// unreliable target.
    fn recognize(&self, block: &Block, image: &Image, architecture: &Architecture) -> Vec<u64>;
}

/// Recognizes the "sum jump" pattern: the program counter is written with
/// `base + index` where `index` was loaded from a constant table address.
/// The table's consecutive pointer-width entries are enumerated until one
/// no longer yields an aligned, executable destination.
#[derive(Clone, Debug, Default)]
pub struct SumJumpRecognizer;

impl SumJumpRecognizer {
    pub fn new() -> SumJumpRecognizer {
        SumJumpRecognizer
    }

    /// Find the constant address the given scalar was most recently loaded
    /// from, searching backward from `position`. The search stops at the
    /// first operation defining the scalar; a non-constant definition
    /// disqualifies the pattern.
    fn table_address(block: &Block, position: usize, index: &crate::il::Scalar) -> Option<u64> {
        for instruction in block.instructions()[..position].iter().rev() {
            if instruction.is_intrinsic() {
                return None;
            }
            if instruction.operation().scalar_written() != Some(index) {
                continue;
            }
            return match instruction.operation() {
                Operation::Load { address, .. } => {
                    address.as_constant().map(|constant| constant.value())
                }
                _ => None,
            };
        }
        None
    }
}

impl TableRecognizer for SumJumpRecognizer {
    fn recognize(&self, block: &Block, image: &Image, architecture: &Architecture) -> Vec<u64> {
        let mut candidates = Vec::new();

        for (position, instruction) in block.instructions().iter().enumerate() {
            let (dst, src) = match instruction.operation() {
                Operation::Assign { dst, src } => (dst, src),
                _ => continue,
            };
            if !architecture.is_pc_register(dst) {
                continue;
            }

            // match `base + index` with a constant base, either order
            let (base, index) = match src {
                Expression::Add(lhs, rhs) => match (lhs.as_ref(), rhs.as_ref()) {
                    (Expression::Constant(constant), Expression::Scalar(scalar))
                    | (Expression::Scalar(scalar), Expression::Constant(constant)) => {
                        (constant.value(), scalar)
                    }
                    _ => continue,
                },
                _ => continue,
            };

            let table = match SumJumpRecognizer::table_address(block, position, index) {
                Some(table) => table,
                None => continue,
            };

            let stride = (architecture.pointer_bits() / 8) as u64;
            let mask = if architecture.pointer_bits() >= 64 {
                u64::MAX
            } else {
                (1 << architecture.pointer_bits()) - 1
            };

            let mut offset = 0;
            while let Some(entry) = image.get_pointer(table + offset, architecture.pointer_bits())
            {
                let destination = base.wrapping_add(entry) & mask;
                if !image.is_executable(destination)
                    || !architecture.is_instruction_aligned(destination)
                {
                    break;
                }
                trace!(
                    "sum jump table 0x{:x}[{}] -> 0x{:x}",
                    table,
                    offset / stride,
                    destination
                );
                candidates.push(destination);
                offset += stride;
            }
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::{self, ControlFlowGraph};
    use crate::memory::{MemoryPermissions, Segment};
    use crate::types::Endian;

    fn image_with_table() -> Image {
        let mut image = Image::new(Endian::Little);
        image
            .add_segment(Segment::new(
                0x1000,
                vec![0u8; 0x40],
                MemoryPermissions::READ | MemoryPermissions::EXECUTE,
            ))
            .unwrap();
        // three offsets into the code segment, then a value leading nowhere
        let mut table = Vec::new();
        for entry in [0x00u32, 0x10, 0x20, 0xFFFF] {
            table.extend_from_slice(&entry.to_le_bytes());
        }
        image
            .add_segment(Segment::new(0x2000, table, MemoryPermissions::READ))
            .unwrap();
        image
    }

    #[test]
    fn harvest_registers_only_valid_pointers() {
        let image = image_with_table();
        let architecture = Architecture::x86();
        let mut registry = JumpTargetRegistry::new(&image, &architecture);

        // the code segment is all zeroes: every word in it reads as 0,
        // which is not executable, so only the table's entries matter and
        // none of them point into code on their own
        let harvested = harvest_image(&mut registry, &image, &architecture);
        assert_eq!(harvested, 0);
        assert!(registry.targets().is_empty());
    }

    #[test]
    fn harvest_picks_up_embedded_pointers() {
        let mut image = Image::new(Endian::Little);
        let mut code = vec![0u8; 0x20];
        // a code pointer to 0x1010 embedded in readable data
        code[0x18..0x1C].copy_from_slice(&0x1010u32.to_le_bytes());
        image
            .add_segment(Segment::new(
                0x1000,
                code,
                MemoryPermissions::READ | MemoryPermissions::EXECUTE,
            ))
            .unwrap();

        let architecture = Architecture::x86();
        let mut registry = JumpTargetRegistry::new(&image, &architecture);
        let harvested = harvest_image(&mut registry, &image, &architecture);

        assert_eq!(harvested, 1);
        let entry = registry.entry(0x1010).unwrap();
        assert!(!entry.reliable());
        assert!(entry.reasons().contains(JumpTargetReason::GLOBAL_DATA));
    }

    #[test]
    fn harvest_excludes_misaligned_candidates() {
        let mut image = Image::new(Endian::Big);
        let mut code = vec![0u8; 0x20];
        // 0x1006 is executable but not 4-byte aligned
        code[0..4].copy_from_slice(&0x1006u32.to_be_bytes());
        code[4..8].copy_from_slice(&0x1010u32.to_be_bytes());
        image
            .add_segment(Segment::new(
                0x1000,
                code,
                MemoryPermissions::READ | MemoryPermissions::EXECUTE,
            ))
            .unwrap();

        let architecture = Architecture::mips();
        let mut registry = JumpTargetRegistry::new(&image, &architecture);
        harvest_image(&mut registry, &image, &architecture);

        assert!(!registry.is_jump_target(0x1006));
        assert!(registry.is_jump_target(0x1010));
    }

    #[test]
    fn sum_jump_recognizer_enumerates_table() {
        let image = image_with_table();
        let architecture = Architecture::x86();

        let mut cfg = ControlFlowGraph::new();
        let block = {
            let block = cfg.new_block();
            block.load(
                il::scalar("eax", 32),
                il::expr_const(0x2000, 32),
                Some(0x1000),
            );
            block.assign(
                il::scalar("eip", 32),
                il::Expression::add(il::expr_const(0x1000, 32), il::expr_scalar("eax", 32))
                    .unwrap(),
                Some(0x1004),
            );
            block.branch(il::expr_scalar("eip", 32), Some(0x1004));
            block.index()
        };

        let candidates =
            SumJumpRecognizer::new().recognize(cfg.block(block).unwrap(), &image, &architecture);
        assert_eq!(candidates, vec![0x1000, 0x1010, 0x1020]);
    }

    #[test]
    fn sum_jump_recognizer_requires_constant_table() {
        let image = image_with_table();
        let architecture = Architecture::x86();

        let mut cfg = ControlFlowGraph::new();
        let block = {
            let block = cfg.new_block();
            // index loaded from a non-constant address
            block.load(il::scalar("eax", 32), il::expr_scalar("ebx", 32), Some(0x1000));
            block.assign(
                il::scalar("eip", 32),
                il::Expression::add(il::expr_const(0x1000, 32), il::expr_scalar("eax", 32))
                    .unwrap(),
                Some(0x1004),
            );
            block.branch(il::expr_scalar("eip", 32), Some(0x1004));
            block.index()
        };

        let candidates =
            SumJumpRecognizer::new().recognize(cfg.block(block).unwrap(), &image, &architecture);
        assert!(candidates.is_empty());
    }
}

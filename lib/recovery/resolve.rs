//! Rewrites statically-known indirect exits into direct edges.
//!
//! Every block whose exit targets the dispatcher is searched backward,
//! within that block only, for the most recent write to the program
//! counter. If the write is a compile-time constant the exit is rewritten
//! as a direct edge to the constant's block, dropping the dispatcher
//! dependency. An opaque helper call encountered before the write ends the
//! search, since helpers may mutate the program counter and invalidate any
//! preceding static write. Exits with no qualifying write stay indirect;
//! the backward search is deliberately local and this is not a defect.

use crate::architecture::Architecture;
use crate::il::{Block, Expression, Operation, Scalar};
use crate::recovery::{Dispatcher, JumpTargetRegistry, JumpTargetReason};

/// The outcome of searching one block for its most recent PC write.
enum PcWrite {
    /// The PC was written with this compile-time constant.
    Constant(u64),
    /// No unique constant write was found: the write was non-constant,
    /// absent, or shadowed by an opaque helper call.
    Unknown,
}

/// Search a block backward from its terminator for the most recent write to
/// the program counter.
fn previous_pc_write(block: &Block, pc: &Scalar) -> PcWrite {
    let instructions = block.instructions();
    let terminator = instructions
        .last()
        .expect("resolver invoked on a block without a terminator");
    assert!(
        terminator.is_branch(),
        "resolver invoked on a block whose terminator is not a branch"
    );

    for instruction in instructions[..instructions.len() - 1].iter().rev() {
        match instruction.operation() {
            Operation::Intrinsic { .. } => return PcWrite::Unknown,
            Operation::Assign { dst, src } if dst == pc => {
                return match src {
                    Expression::Constant(constant) => PcWrite::Constant(constant.value()),
                    _ => PcWrite::Unknown,
                };
            }
            Operation::Load { dst, .. } if dst == pc => return PcWrite::Unknown,
            _ => {}
        }
    }
    PcWrite::Unknown
}

/// Rewrite every dispatcher exit whose program-counter write is a
/// compile-time constant into a direct edge. Returns the number of exits
/// rewritten. Rewriting may register new jump targets; the caller is
/// responsible for translating anything this enqueues.
pub fn resolve_direct_branches(
    registry: &mut JumpTargetRegistry,
    dispatcher: &Dispatcher,
    architecture: &Architecture,
) -> usize {
    let pc = architecture.pc().clone();
    let mut rewritten = 0;

    // materializing a resolved target can split a candidate block, moving
    // its dispatcher exit onto a block this pass has not seen; iterate to a
    // fixed point
    loop {
        let candidates: Vec<usize> = registry
            .cfg()
            .blocks()
            .iter()
            .map(|block| block.index())
            .filter(|&index| {
                !dispatcher.is_dispatcher_block(index)
                    && registry.cfg().has_edge(index, dispatcher.block())
            })
            .collect();

        let mut progress = false;
        for index in candidates {
            // a split earlier in this pass may have moved the exit away
            let condition = match registry.cfg().edge(index, dispatcher.block()) {
                Ok(edge) => edge.condition().cloned(),
                Err(_) => continue,
            };

            let value = match previous_pc_write(registry.cfg().block(index).unwrap(), &pc) {
                PcWrite::Constant(value) => value,
                PcWrite::Unknown => continue,
            };

            let target = registry.materialize(value, true, JumpTargetReason::DIRECT_JUMP);

            // materializing the target can split this very block, moving
            // its dispatcher exit onto the split-off tail; the next pass
            // picks the tail up
            if !registry.cfg().has_edge(index, dispatcher.block()) {
                progress = true;
                continue;
            }
            registry
                .cfg_mut()
                .remove_edge(index, dispatcher.block())
                .expect("dispatcher exit vanished during resolution");
            let tail = match target {
                Some(block) => block,
                // constant points outside executable code
                None => dispatcher.unexpected_pc(),
            };
            trace!(
                "resolved indirect exit of block 0x{:x} to 0x{:x} (block 0x{:x})",
                index,
                value,
                tail
            );
            if !registry.cfg().has_edge(index, tail) {
                match condition {
                    Some(condition) => registry
                        .cfg_mut()
                        .conditional_edge(index, tail, condition)
                        .expect("could not rewrite resolved exit"),
                    None => registry
                        .cfg_mut()
                        .unconditional_edge(index, tail)
                        .expect("could not rewrite resolved exit"),
                }
            }
            rewritten += 1;
            progress = true;
        }

        if !progress {
            break;
        }
    }

    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il;
    use crate::memory::{Image, MemoryPermissions, Segment};
    use crate::types::Endian;

    fn setup() -> (JumpTargetRegistry, Dispatcher, Architecture) {
        let mut image = Image::new(Endian::Little);
        image
            .add_segment(Segment::new(
                0x1000,
                vec![0u8; 0x100],
                MemoryPermissions::READ | MemoryPermissions::EXECUTE,
            ))
            .unwrap();
        let architecture = Architecture::x86();
        let mut registry = JumpTargetRegistry::new(&image, &architecture);
        let dispatcher = Dispatcher::new(registry.cfg_mut(), &architecture);
        (registry, dispatcher, architecture)
    }

    fn pc_expr() -> il::Expression {
        il::expr_scalar("eip", 32)
    }

    #[test]
    fn constant_write_resolves_to_direct_edge() {
        let (mut registry, dispatcher, architecture) = setup();
        let block = registry
            .materialize(0x1000, true, JumpTargetReason::ENTRY_POINT)
            .unwrap();
        registry.pop_unexplored().unwrap();
        {
            let block = registry.cfg_mut().block_mut(block).unwrap();
            block.assign(il::scalar("eip", 32), il::expr_const(0x1010, 32), Some(0x1000));
            block.branch(pc_expr(), Some(0x1000));
        }
        registry
            .cfg_mut()
            .unconditional_edge(block, dispatcher.block())
            .unwrap();

        assert_eq!(
            resolve_direct_branches(&mut registry, &dispatcher, &architecture),
            1
        );

        let target = registry.lookup(0x1010).unwrap();
        assert!(!registry.cfg().has_edge(block, dispatcher.block()));
        assert!(registry.cfg().has_edge(block, target));
        assert!(registry.entry(0x1010).unwrap().reliable());
    }

    #[test]
    fn helper_call_blocks_resolution() {
        let (mut registry, dispatcher, architecture) = setup();
        let block = registry
            .materialize(0x1000, true, JumpTargetReason::ENTRY_POINT)
            .unwrap();
        registry.pop_unexplored().unwrap();
        {
            let block = registry.cfg_mut().block_mut(block).unwrap();
            block.assign(il::scalar("eip", 32), il::expr_const(0x1010, 32), Some(0x1000));
            block.intrinsic("syscall", Some(0x1002));
            block.branch(pc_expr(), Some(0x1002));
        }
        registry
            .cfg_mut()
            .unconditional_edge(block, dispatcher.block())
            .unwrap();

        assert_eq!(
            resolve_direct_branches(&mut registry, &dispatcher, &architecture),
            0
        );
        assert!(registry.cfg().has_edge(block, dispatcher.block()));
        assert_eq!(registry.lookup(0x1010), None);
    }

    #[test]
    fn non_constant_write_stays_indirect() {
        let (mut registry, dispatcher, architecture) = setup();
        let block = registry
            .materialize(0x1000, true, JumpTargetReason::ENTRY_POINT)
            .unwrap();
        registry.pop_unexplored().unwrap();
        {
            let block = registry.cfg_mut().block_mut(block).unwrap();
            block.assign(il::scalar("eip", 32), il::expr_scalar("eax", 32), Some(0x1000));
            block.branch(pc_expr(), Some(0x1000));
        }
        registry
            .cfg_mut()
            .unconditional_edge(block, dispatcher.block())
            .unwrap();

        assert_eq!(
            resolve_direct_branches(&mut registry, &dispatcher, &architecture),
            0
        );
        assert!(registry.cfg().has_edge(block, dispatcher.block()));
    }

    #[test]
    fn constant_outside_code_routes_to_unexpected_pc() {
        let (mut registry, dispatcher, architecture) = setup();
        let block = registry
            .materialize(0x1000, true, JumpTargetReason::ENTRY_POINT)
            .unwrap();
        registry.pop_unexplored().unwrap();
        {
            let block = registry.cfg_mut().block_mut(block).unwrap();
            block.assign(il::scalar("eip", 32), il::expr_const(0xdead, 32), Some(0x1000));
            block.branch(pc_expr(), Some(0x1000));
        }
        registry
            .cfg_mut()
            .unconditional_edge(block, dispatcher.block())
            .unwrap();

        assert_eq!(
            resolve_direct_branches(&mut registry, &dispatcher, &architecture),
            1
        );
        assert!(!registry.cfg().has_edge(block, dispatcher.block()));
        assert!(registry.cfg().has_edge(block, dispatcher.unexpected_pc()));
    }
}

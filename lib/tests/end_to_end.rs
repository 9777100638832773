//! Whole-engine scenarios driven by scripted translators.

use crate::architecture::Architecture;
use crate::il::{self, Expression};
use crate::memory::{Image, MemoryPermissions, Segment};
use crate::recovery::{
    BlockTag, ExplorationDriver, JumpTargetReason, TranslationContext, Translator,
};
use crate::types::Endian;
use crate::Error;
use std::collections::BTreeSet;

fn image() -> Image {
    let mut image = Image::new(Endian::Little);
    image
        .add_segment(Segment::new(
            0x1000,
            vec![0u8; 0x20],
            MemoryPermissions::READ | MemoryPermissions::EXECUTE,
        ))
        .unwrap();
    image
}

fn pc() -> il::Scalar {
    il::scalar("eip", 32)
}

/// Emit one nop per 4-byte instruction over `[start, end)`.
fn translate_straight(context: &mut TranslationContext, start: u64, end: u64) {
    let mut address = start;
    while address < end {
        context.register_instruction(address);
        context.nop(Some(address));
        address += 4;
    }
}

/// A loop followed by a tail: straight-line code over 0x1000-0x100F ending
/// in a conditional branch that writes either 0x1000 or 0x1010 to the
/// program counter, with 0x1010-0x101F falling through to nothing further.
struct LoopAndTail;

impl Translator for LoopAndTail {
    fn translate(
        &mut self,
        context: &mut TranslationContext,
        address: u64,
    ) -> Result<bool, Error> {
        match address {
            0x1000 => {
                let head = context.block();
                translate_straight(context, 0x1000, 0x100C);

                // the conditional branch at 0x100C lowers to two arms, each
                // writing its destination to the program counter
                context.register_instruction(0x100C);
                let taken = context.new_block();
                let fallthrough = context.new_block();
                let condition =
                    Expression::cmpeq(il::expr_scalar("eax", 32), il::expr_const(0, 32))?;
                let not_condition =
                    Expression::cmpeq(condition.clone(), il::expr_const(0, 1))?;
                context.conditional_edge(head, taken, condition)?;
                context.conditional_edge(head, fallthrough, not_condition)?;

                context.set_block(taken);
                context.assign(pc(), il::expr_const(0x1000, 32), Some(0x100C));
                context.branch(il::expr_scalar("eip", 32), Some(0x100C));
                context.exit_to_dispatcher(None)?;

                context.set_block(fallthrough);
                context.assign(pc(), il::expr_const(0x1010, 32), Some(0x100C));
                context.branch(il::expr_scalar("eip", 32), Some(0x100C));
                context.exit_to_dispatcher(None)?;

                Ok(true)
            }
            0x1010 => {
                translate_straight(context, 0x1010, 0x101C);
                context.register_instruction(0x101C);
                context.intrinsic("exit", Some(0x101C));
                context.branch(il::expr_scalar("eip", 32), Some(0x101C));
                context.exit_to_dispatcher(None)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[test]
fn loop_and_tail_scenario() {
    let image = image();
    let mut driver = ExplorationDriver::new(&image, Architecture::x86());
    driver.run(&mut LoopAndTail, 0x1000).unwrap();

    // two reliable entries: the entry point and the resolved tail
    {
        let registry = driver.registry();
        let addresses: Vec<u64> = registry.targets().keys().copied().collect();
        assert_eq!(addresses, vec![0x1000, 0x1010]);
        assert!(registry.entry(0x1000).unwrap().reliable());
        assert!(registry.entry(0x1010).unwrap().reliable());

        // full byte-range coverage: every instruction in the segment was
        // registered
        for address in (0x1000..0x1020).step_by(4) {
            assert!(
                registry.instruction_site(address).is_some(),
                "no instruction registered at 0x{:x}",
                address
            );
        }
        assert_eq!(registry.next_instruction_address(0x1000), Some(0x1004));

        // the head's only successors are the two lowered arms
        let head_successors =
            registry.successors(registry.lookup(0x1000).unwrap(), driver.dispatcher());
        assert!(head_successors.other);
        assert!(!head_successors.dispatcher);
        assert!(head_successors.addresses.is_empty());
    }

    // dispatcher completeness: one arm per target, no duplicates
    assert_eq!(driver.dispatcher().arms().len(), 2);

    let program = driver.finish();
    let entry_block = program.block_at(0x1000).unwrap();
    let tail_block = program.block_at(0x1010).unwrap();

    // both conditional arms resolved to direct edges
    let mut resolved: BTreeSet<u64> = BTreeSet::new();
    for successor in program.cfg().successor_indices(entry_block).unwrap() {
        for arm_successor in program.cfg().successor_indices(successor).unwrap() {
            if let Some(tag) = program.tag(arm_successor) {
                if let Some(address) = tag.address() {
                    resolved.insert(address);
                }
            }
            assert_ne!(arm_successor, program.dispatcher().block());
        }
    }
    assert_eq!(resolved, BTreeSet::from([0x1000, 0x1010]));

    // no traversal from the entry reaches the unexpected-PC sink
    let mut reachable = BTreeSet::new();
    let mut queue = vec![entry_block];
    while let Some(block) = queue.pop() {
        if !reachable.insert(block) {
            continue;
        }
        for successor in program.cfg().successor_indices(block).unwrap() {
            queue.push(successor);
        }
    }
    assert!(!reachable.contains(&program.dispatcher().unexpected_pc()));
    assert!(reachable.contains(&tail_block));

    // the tail's exit stays indirect: its last write to the program counter
    // is shadowed by the exit helper
    let successors = program.successors(tail_block);
    assert!(successors.dispatcher);
    assert!(!successors.unexpected_pc);
}

/// Translates 0x1000-0x100F as one straight-line block whose exit writes a
/// constant back into the middle of itself.
struct BackwardJump;

impl Translator for BackwardJump {
    fn translate(
        &mut self,
        context: &mut TranslationContext,
        address: u64,
    ) -> Result<bool, Error> {
        if address != 0x1000 {
            return Ok(false);
        }
        translate_straight(context, 0x1000, 0x100C);
        context.register_instruction(0x100C);
        context.assign(pc(), il::expr_const(0x1004, 32), Some(0x100C));
        context.branch(il::expr_scalar("eip", 32), Some(0x100C));
        context.exit_to_dispatcher(None)?;
        Ok(true)
    }
}

#[test]
fn backward_jump_splits_translated_block() {
    let image = image();
    let mut driver = ExplorationDriver::new(&image, Architecture::x86());
    driver.run(&mut BackwardJump, 0x1000).unwrap();

    let registry = driver.registry();
    let head = registry.lookup(0x1000).unwrap();
    let tail = registry.lookup(0x1004).unwrap();
    assert_ne!(head, tail);

    // the head falls through to the split-off tail
    assert!(registry.cfg().has_edge(head, tail));
    assert_eq!(registry.cfg().block(head).unwrap().len(), 1);

    // the split target came from a constant program-counter write
    let entry = registry.entry(0x1004).unwrap();
    assert!(entry.reliable());
    assert!(entry.reasons().contains(JumpTargetReason::DIRECT_JUMP));

    // the dispatcher exit moved to the tail during the split, and the
    // resolver then rewrote it into a direct self-loop
    assert!(registry.cfg().has_edge(tail, tail));
    assert!(!registry
        .cfg()
        .has_edge(tail, driver.dispatcher().block()));
    assert!(!registry
        .cfg()
        .has_edge(head, driver.dispatcher().block()));

    assert_eq!(driver.dispatcher().arms().len(), 2);
}

/// Uses `new_target` to continue translating across a fallthrough boundary
/// within a single `translate` call.
struct FallthroughContinuation;

impl Translator for FallthroughContinuation {
    fn translate(
        &mut self,
        context: &mut TranslationContext,
        address: u64,
    ) -> Result<bool, Error> {
        if address != 0x1000 {
            return Ok(false);
        }
        translate_straight(context, 0x1000, 0x1010);
        let head = context.block();

        let (tail, should_continue) = context.new_target(0x1010).unwrap();
        assert!(should_continue);
        context.unconditional_edge(head, tail)?;

        context.set_block(tail);
        translate_straight(context, 0x1010, 0x101C);
        context.register_instruction(0x101C);
        context.intrinsic("exit", Some(0x101C));
        context.branch(il::expr_scalar("eip", 32), Some(0x101C));
        context.exit_to_dispatcher(None)?;

        // translating the same target again reports it as done
        let (again, should_continue) = context.new_target(0x1010).unwrap();
        assert_eq!(again, tail);
        assert!(!should_continue);

        Ok(true)
    }
}

#[test]
fn fallthrough_continuation_claims_the_target() {
    let image = image();
    let mut driver = ExplorationDriver::new(&image, Architecture::x86());
    driver.run(&mut FallthroughContinuation, 0x1000).unwrap();

    let registry = driver.registry();
    let entry = registry.entry(0x1010).unwrap();
    assert!(entry.visited());
    assert!(!entry.reliable());
    assert!(entry.reasons().contains(JumpTargetReason::FALLTHROUGH));
    assert!(!registry.is_reliable_pc(0x1014));
    assert!(registry.is_reliable_pc(0x1004));

    let program = driver.finish();
    let head = program.block_at(0x1000).unwrap();
    let tail = program.block_at(0x1010).unwrap();
    let successors = program.successors(head);
    assert_eq!(successors.addresses, BTreeSet::from([0x1010]));
    assert!(!successors.dispatcher);
    assert_eq!(
        program.tag(tail),
        Some(&BlockTag::JumpTarget { address: 0x1010 })
    );
}

/// A jump table of offsets from a base, dispatched through a sum jump.
struct TableJump;

impl Translator for TableJump {
    fn translate(
        &mut self,
        context: &mut TranslationContext,
        address: u64,
    ) -> Result<bool, Error> {
        match address {
            0x1000 => {
                context.register_instruction(0x1000);
                context.load(il::scalar("eax", 32), il::expr_const(0x2000, 32), Some(0x1000));
                context.register_instruction(0x1004);
                context.assign(
                    pc(),
                    Expression::add(il::expr_const(0x1000, 32), il::expr_scalar("eax", 32))?,
                    Some(0x1004),
                );
                context.branch(il::expr_scalar("eip", 32), Some(0x1004));
                context.exit_to_dispatcher(None)?;
                Ok(true)
            }
            0x1010 | 0x1018 => {
                context.register_instruction(address);
                context.intrinsic("exit", Some(address));
                context.branch(il::expr_scalar("eip", 32), Some(address));
                context.exit_to_dispatcher(None)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[test]
fn table_recognizer_feeds_exploration() {
    let mut image = image();
    // a table of offsets from 0x1000; 0x8000 leads outside the segment and
    // ends the enumeration
    let mut table = Vec::new();
    for entry in [0x10u32, 0x18, 0x8000] {
        table.extend_from_slice(&entry.to_le_bytes());
    }
    image
        .add_segment(Segment::new(0x2000, table, MemoryPermissions::READ))
        .unwrap();

    let mut driver = ExplorationDriver::new(&image, Architecture::x86());
    driver.add_recognizer(Box::new(crate::recovery::SumJumpRecognizer::new()));
    driver.run(&mut TableJump, 0x1000).unwrap();

    let registry = driver.registry();
    for address in [0x1010u64, 0x1018] {
        let entry = registry.entry(address).unwrap();
        assert!(entry.visited(), "table entry 0x{:x} was not explored", address);
        assert!(entry.reasons().contains(JumpTargetReason::SUM_JUMP));
        assert!(!entry.reliable());
    }
    assert!(!registry.is_jump_target(0x9000));
    assert_eq!(driver.dispatcher().arms().len(), 3);
}

//! The dispatcher: a synthetic multiway branch over every known jump
//! target.
//!
//! Blocks whose exit cannot be resolved statically branch to the dispatcher
//! instead. The dispatcher holds one arm per registered jump-target
//! address, a sink for program counters that fall outside every executable
//! range, and a generic failure sink for everything else. Because
//! exploration is incremental, blocks translated early reference the
//! dispatcher block as a whole; its arm set may grow after an edge to it
//! already exists without invalidating that edge. Arms are only ever added,
//! never removed.

use crate::architecture::Architecture;
use crate::il::{self, ControlFlowGraph, Expression};
use crate::Error;
use std::collections::BTreeMap;

/// The dispatcher block and its two sink blocks.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    block: usize,
    unexpected_pc: usize,
    fail: usize,
    arms: BTreeMap<u64, usize>,
    pc: Expression,
}

impl Dispatcher {
    /// Create the dispatcher and its sinks inside the given graph.
    pub fn new(cfg: &mut ControlFlowGraph, architecture: &Architecture) -> Dispatcher {
        let pc = Expression::scalar(architecture.pc().clone());

        let block = {
            let block = cfg.new_block();
            block.branch(pc.clone(), None);
            block.index()
        };

        let unexpected_pc = {
            let block = cfg.new_block();
            block.intrinsic("unexpected_pc", None);
            block.index()
        };

        let fail = {
            let block = cfg.new_block();
            block.intrinsic("dispatcher_fail", None);
            block.index()
        };

        // anything matching no arm falls through to the failure sink
        cfg.unconditional_edge(block, fail)
            .expect("dispatcher blocks were just created");

        Dispatcher {
            block,
            unexpected_pc,
            fail,
            arms: BTreeMap::new(),
            pc,
        }
    }

    /// The dispatcher block itself.
    pub fn block(&self) -> usize {
        self.block
    }

    /// The sink for program counters outside every executable range.
    pub fn unexpected_pc(&self) -> usize {
        self.unexpected_pc
    }

    /// The sink for program counters no arm matches.
    pub fn fail(&self) -> usize {
        self.fail
    }

    /// The arm set: target address to block index.
    pub fn arms(&self) -> &BTreeMap<u64, usize> {
        &self.arms
    }

    /// True if the index is the dispatcher block or one of its sinks.
    pub fn is_dispatcher_block(&self, index: usize) -> bool {
        index == self.block || index == self.unexpected_pc || index == self.fail
    }

    /// Add an arm branching to the block for the given target address. Adding
    /// an arm that already exists is a no-op.
    pub fn add_arm(
        &mut self,
        cfg: &mut ControlFlowGraph,
        address: u64,
        target: usize,
    ) -> Result<(), Error> {
        if self.arms.contains_key(&address) {
            return Ok(());
        }
        trace!("dispatcher arm 0x{:x} -> block 0x{:x}", address, target);
        let condition = Expression::cmpeq(
            self.pc.clone(),
            il::expr_const(address, self.pc.bits()),
        )?;
        cfg.conditional_edge(self.block, target, condition)?;
        self.arms.insert(address, target);
        Ok(())
    }
}

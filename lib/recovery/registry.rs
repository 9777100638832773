//! The jump-target registry.
//!
//! The registry owns the address→block map for the whole recovery: one
//! entry per discovered jump target, ordered by address so that reliability
//! inheritance and split-point lookups can walk to the nearest entry at or
//! before an arbitrary program counter. It also owns the queue of targets
//! that still await translation, and every decision about splitting a block
//! when a target lands in the middle of already-translated code.

use crate::architecture::Architecture;
use crate::il::{ControlFlowGraph, Edge};
use crate::memory::Image;
use crate::recovery::Dispatcher;
use bitflags::bitflags;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

bitflags! {
    /// Why an address was recorded as a jump target. An entry accumulates
    /// reasons as the same address is discovered through different paths.
    pub struct JumpTargetReason: u32 {
        /// The program entry point.
        const ENTRY_POINT = 0b00001;
        /// A statically known write to the program counter.
        const DIRECT_JUMP = 0b00010;
        /// A plausible code pointer found in global data.
        const GLOBAL_DATA = 0b00100;
        /// The address after a control transfer.
        const FALLTHROUGH = 0b01000;
        /// An entry enumerated from a recognized jump table.
        const SUM_JUMP    = 0b10000;
    }
}

/// A registered jump target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JumpTargetEntry {
    block: usize,
    reliable: bool,
    visited: bool,
    reasons: JumpTargetReason,
}

impl JumpTargetEntry {
    /// The index of the block starting at this target.
    pub fn block(&self) -> usize {
        self.block
    }

    /// True if this target was derived from an explicit, statically
    /// analyzable program-counter write, as opposed to heuristic or
    /// fallthrough inference.
    pub fn reliable(&self) -> bool {
        self.reliable
    }

    /// True once the target has been picked up for translation. Cleared on
    /// reliability promotion so that decisions made under weaker
    /// assumptions can be re-examined.
    pub fn visited(&self) -> bool {
        self.visited
    }

    pub fn reasons(&self) -> JumpTargetReason {
        self.reasons
    }
}

/// Where a translated instruction landed: which block, and at which
/// position within the block's instruction sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct InstructionSite {
    block: usize,
    position: usize,
}

/// A summary of a block's outgoing edges for downstream consumers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Successors {
    /// The block exits to the dispatcher.
    pub dispatcher: bool,
    /// The block exits to the unexpected-PC sink.
    pub unexpected_pc: bool,
    /// The block has a successor which is neither a jump target nor a
    /// dispatcher-related block.
    pub other: bool,
    /// The addresses of every jump-target successor.
    pub addresses: BTreeSet<u64>,
}

/// Owns the address→block map, the reliability and visited state of every
/// jump target, and the queue of unexplored targets.
pub struct JumpTargetRegistry {
    cfg: ControlFlowGraph,
    instruction_alignment: u64,
    executable_ranges: Vec<(u64, u64)>,
    targets: BTreeMap<u64, JumpTargetEntry>,
    instruction_sites: BTreeMap<u64, InstructionSite>,
    block_addresses: FxHashMap<usize, u64>,
    unexplored: BTreeMap<u64, usize>,
}

impl JumpTargetRegistry {
    /// Create a registry for the given image. Executable ranges are derived
    /// once here; the image itself is not retained.
    pub fn new(image: &Image, architecture: &Architecture) -> JumpTargetRegistry {
        JumpTargetRegistry {
            cfg: ControlFlowGraph::new(),
            instruction_alignment: architecture.instruction_alignment(),
            executable_ranges: image.executable_ranges(),
            targets: BTreeMap::new(),
            instruction_sites: BTreeMap::new(),
            block_addresses: FxHashMap::default(),
            unexplored: BTreeMap::new(),
        }
    }

    /// The control flow graph under construction.
    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    pub fn cfg_mut(&mut self) -> &mut ControlFlowGraph {
        &mut self.cfg
    }

    pub(crate) fn into_cfg(self) -> ControlFlowGraph {
        self.cfg
    }

    /// Every registered jump target, ordered by address.
    pub fn targets(&self) -> &BTreeMap<u64, JumpTargetEntry> {
        &self.targets
    }

    pub fn entry(&self, address: u64) -> Option<&JumpTargetEntry> {
        self.targets.get(&address)
    }

    /// Exact-match lookup of the block registered for an address. No side
    /// effects.
    pub fn lookup(&self, address: u64) -> Option<usize> {
        self.targets.get(&address).map(|entry| entry.block)
    }

    pub fn is_jump_target(&self, address: u64) -> bool {
        self.targets.contains_key(&address)
    }

    /// The address a block is registered at, if the block is a jump-target
    /// head.
    pub fn block_address(&self, block: usize) -> Option<u64> {
        self.block_addresses.get(&block).copied()
    }

    /// True if the address is inside an executable segment.
    pub fn is_executable_address(&self, address: u64) -> bool {
        self.executable_ranges
            .iter()
            .any(|&(start, end)| start <= address && address < end)
    }

    /// True if the address respects the input architecture's instruction
    /// alignment.
    pub fn is_instruction_aligned(&self, address: u64) -> bool {
        address % self.instruction_alignment == 0
    }

    /// True if the address is a good candidate for exploration: aligned,
    /// executable, and not yet registered.
    pub fn is_interesting(&self, address: u64) -> bool {
        self.is_executable_address(address)
            && self.is_instruction_aligned(address)
            && !self.targets.contains_key(&address)
    }

    /// True if the nearest registered entry at or before the address is
    /// reliable. Lets a whole block inherit reliability from its head.
    pub fn is_reliable_pc(&self, address: u64) -> bool {
        self.targets
            .range(..=address)
            .next_back()
            .map(|(_, entry)| entry.reliable)
            .unwrap_or(false)
    }

    /// Record the block and position an address was translated at. Needed
    /// for splitting and next-instruction queries.
    pub fn register_instruction(&mut self, address: u64, block: usize, position: usize) {
        self.instruction_sites
            .insert(address, InstructionSite { block, position });
    }

    /// The block and instruction position an address was translated at.
    pub fn instruction_site(&self, address: u64) -> Option<(usize, usize)> {
        self.instruction_sites
            .get(&address)
            .map(|site| (site.block, site.position))
    }

    /// The address of the first registered instruction after `address`.
    pub fn next_instruction_address(&self, address: u64) -> Option<u64> {
        use std::ops::Bound::{Excluded, Unbounded};
        self.instruction_sites
            .range((Excluded(address), Unbounded))
            .next()
            .map(|(next, _)| *next)
    }

    /// Handle a new program counter during translation.
    ///
    /// Returns the block to use and whether translation should continue
    /// into it. An already-translated target is returned with `false`; a
    /// placeholder is claimed for the caller (dequeued and marked visited)
    /// and returned with `true`. Returns `None` if the address is not a
    /// valid jump target.
    pub fn new_target(&mut self, address: u64) -> Option<(usize, bool)> {
        if let Some(entry) = self.targets.get_mut(&address) {
            if entry.visited {
                return Some((entry.block, false));
            }
            entry.visited = true;
            let block = entry.block;
            self.unexplored.remove(&address);
            return Some((block, true));
        }

        let block = self.materialize(address, false, JumpTargetReason::FALLTHROUGH)?;
        let entry = self
            .targets
            .get_mut(&address)
            .expect("materialize registered no entry");
        entry.visited = true;
        self.unexplored.remove(&address);
        Some((block, true))
    }

    /// Get or create a block for the given address.
    ///
    /// Returns `None` if the address is outside every executable range or
    /// violates instruction alignment. If the address matches a registered
    /// entry the entry's block is returned, promoting the entry when
    /// `reliable` upgrades it; a promotion clears the visited bit so that
    /// earlier decisions made under weaker assumptions are re-examined. If
    /// the address falls strictly inside an already-translated block, the
    /// block is split. Otherwise a fresh placeholder is registered and
    /// enqueued for exploration.
    pub fn materialize(
        &mut self,
        address: u64,
        reliable: bool,
        reasons: JumpTargetReason,
    ) -> Option<usize> {
        if !self.is_executable_address(address) || !self.is_instruction_aligned(address) {
            return None;
        }

        if self.targets.contains_key(&address) {
            let entry = self.targets.get_mut(&address).unwrap();
            entry.reasons |= reasons;
            if reliable && !entry.reliable {
                debug!("promoting jump target 0x{:x} to reliable", address);
                entry.reliable = true;
                entry.visited = false;
            }
            return Some(entry.block);
        }

        if let Some(site) = self.instruction_sites.get(&address).copied() {
            let block = self.split_block(address, site);
            self.targets.insert(
                address,
                JumpTargetEntry {
                    block,
                    reliable,
                    visited: true,
                    reasons,
                },
            );
            self.block_addresses.insert(block, address);
            return Some(block);
        }

        debug!("registering jump target 0x{:x}", address);
        let block = self.cfg.new_block().index();
        self.targets.insert(
            address,
            JumpTargetEntry {
                block,
                reliable,
                visited: false,
                reasons,
            },
        );
        self.block_addresses.insert(block, address);
        self.unexplored.insert(address, block);
        Some(block)
    }

    /// Split the block containing `address` so that the instruction at
    /// `address` starts a new block. Operations before the split point stay
    /// in place and fall through to the new block; operations at and after
    /// it move, along with the old block's outgoing edges.
    fn split_block(&mut self, address: u64, site: InstructionSite) -> usize {
        let old = site.block;

        if site.position == 0 {
            // the block already starts here, no split required
            return old;
        }

        debug!(
            "splitting block 0x{:x} at 0x{:x} (position {})",
            old, address, site.position
        );

        let new = self.cfg.new_block().index();

        let moved = self
            .cfg
            .block_mut(old)
            .expect("split source block missing")
            .split_off(site.position);
        for instruction in &moved {
            self.cfg
                .block_mut(new)
                .expect("split destination block missing")
                .adopt(instruction);
        }

        // the old block's outgoing edges now leave the new block
        let out_edges: Vec<Edge> = self
            .cfg
            .edges_out(old)
            .expect("split source block missing")
            .into_iter()
            .cloned()
            .collect();
        for edge in out_edges {
            self.cfg
                .remove_edge(edge.head(), edge.tail())
                .expect("edge vanished during split");
            match edge.condition() {
                Some(condition) => self
                    .cfg
                    .conditional_edge(new, edge.tail(), condition.clone())
                    .expect("could not re-attach edge during split"),
                None => self
                    .cfg
                    .unconditional_edge(new, edge.tail())
                    .expect("could not re-attach edge during split"),
            }
        }
        self.cfg
            .unconditional_edge(old, new)
            .expect("could not create fallthrough edge during split");

        // re-point the moved instruction sites at the new block
        let split_position = site.position;
        let moved_addresses: Vec<u64> = self
            .instruction_sites
            .range(address..)
            .filter(|(_, moved_site)| moved_site.block == old)
            .map(|(moved_address, _)| *moved_address)
            .collect();
        for moved_address in moved_addresses {
            let moved_site = self.instruction_sites.get_mut(&moved_address).unwrap();
            moved_site.block = new;
            moved_site.position -= split_position;
        }

        new
    }

    /// Clear the visited bit of a jump-target block, forcing
    /// re-consideration when later evidence invalidates earlier heuristic
    /// decisions about that region. The block must be a jump-target head.
    pub fn unvisit(&mut self, block: usize) {
        let address = *self
            .block_addresses
            .get(&block)
            .expect("unvisit of a block that is not a jump target");
        self.targets.get_mut(&address).unwrap().visited = false;
    }

    /// Pop the lowest-address unexplored target, marking it visited.
    pub fn pop_unexplored(&mut self) -> Option<(u64, usize)> {
        let (address, block) = self
            .unexplored
            .iter()
            .next()
            .map(|(address, block)| (*address, *block))?;
        self.unexplored.remove(&address);
        let entry = self
            .targets
            .get_mut(&address)
            .expect("unexplored address has no registry entry");
        entry.visited = true;
        Some((address, block))
    }

    /// True if no unexplored jump targets remain.
    pub fn is_exhausted(&self) -> bool {
        self.unexplored.is_empty()
    }

    /// Summarize a block's outgoing edges for downstream consumers.
    pub fn successors(&self, block: usize, dispatcher: &Dispatcher) -> Successors {
        successors_of(&self.cfg, &self.block_addresses, dispatcher, block)
    }

    pub(crate) fn block_addresses(&self) -> &FxHashMap<usize, u64> {
        &self.block_addresses
    }
}

/// Summarize a block's outgoing edges against a block→address map.
pub(crate) fn successors_of(
    cfg: &ControlFlowGraph,
    block_addresses: &FxHashMap<usize, u64>,
    dispatcher: &Dispatcher,
    block: usize,
) -> Successors {
    let mut successors = Successors::default();
    let edges = match cfg.edges_out(block) {
        Ok(edges) => edges,
        Err(_) => return successors,
    };
    for edge in edges {
        let tail = edge.tail();
        if tail == dispatcher.block() {
            successors.dispatcher = true;
        } else if tail == dispatcher.unexpected_pc() {
            successors.unexpected_pc = true;
        } else if let Some(address) = block_addresses.get(&tail) {
            successors.addresses.insert(*address);
        } else {
            successors.other = true;
        }
    }
    successors
}

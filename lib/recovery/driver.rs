//! The exploration driver and the translator interface.
//!
//! The driver ties the registry, dispatcher, harvester, and resolver
//! together in one control loop, handing placeholder blocks to an
//! externally supplied [`Translator`]. Everything the translator needs is
//! passed in explicitly through a [`TranslationContext`]; there is no
//! ambient state.

use crate::architecture::Architecture;
use crate::il::{ControlFlowGraph, Expression, Scalar};
use crate::memory::Image;
use crate::recovery::registry::successors_of;
use crate::recovery::{
    harvest_image, resolve_direct_branches, Dispatcher, JumpTargetEntry, JumpTargetReason,
    JumpTargetRegistry, Successors, TableRecognizer,
};
use crate::Error;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// The external translator capability.
///
/// Condor calls `translate` once for each jump target it pops from the
/// unexplored queue. The translator decodes at `address`, emits operations
/// through the context, and reports the control-flow targets it discovers
/// with the context's `materialize` and `new_target` callbacks, which are
/// safe to call at any point during the run. The context (and with it every
/// block reference) must not be retained beyond the call.
///
/// Returns `Ok(false)` if nothing could be decoded at `address`; the driver
/// then routes the placeholder to the unexpected-PC sink.
pub trait Translator {
    fn translate(
        &mut self,
        context: &mut TranslationContext,
        address: u64,
    ) -> Result<bool, Error>;
}

/// The translator's window into an in-progress recovery.
///
/// Tracks the block currently being filled, forwards emitted operations to
/// it, and exposes the registry callbacks the translator drives discovery
/// with.
pub struct TranslationContext<'a> {
    registry: &'a mut JumpTargetRegistry,
    dispatcher: &'a Dispatcher,
    image: &'a Image,
    architecture: &'a Architecture,
    block: usize,
    filled: Vec<usize>,
}

impl<'a> TranslationContext<'a> {
    fn new(
        registry: &'a mut JumpTargetRegistry,
        dispatcher: &'a Dispatcher,
        image: &'a Image,
        architecture: &'a Architecture,
        block: usize,
    ) -> TranslationContext<'a> {
        TranslationContext {
            registry,
            dispatcher,
            image,
            architecture,
            block,
            filled: vec![block],
        }
    }

    pub fn image(&self) -> &Image {
        self.image
    }

    pub fn architecture(&self) -> &Architecture {
        self.architecture
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher
    }

    /// The index of the block currently being filled.
    pub fn block(&self) -> usize {
        self.block
    }

    /// Switch to filling another block, typically after `new_target`
    /// requested continuation there.
    pub fn set_block(&mut self, block: usize) {
        if !self.filled.contains(&block) {
            self.filled.push(block);
        }
        self.block = block;
    }

    /// Create an anonymous block, for lowering multiway control flow.
    pub fn new_block(&mut self) -> usize {
        let block = self.registry.cfg_mut().new_block().index();
        self.filled.push(block);
        block
    }

    /// Record that the operations about to be emitted correspond to the
    /// original instruction at `address`.
    pub fn register_instruction(&mut self, address: u64) {
        let position = self
            .registry
            .cfg()
            .block(self.block)
            .expect("translation context points at a missing block")
            .len();
        self.registry.register_instruction(address, self.block, position);
    }

    pub fn assign(&mut self, dst: Scalar, src: Expression, address: Option<u64>) {
        self.block_mut().assign(dst, src, address);
    }

    pub fn store(&mut self, address_expr: Expression, src: Expression, address: Option<u64>) {
        self.block_mut().store(address_expr, src, address);
    }

    pub fn load(&mut self, dst: Scalar, address_expr: Expression, address: Option<u64>) {
        self.block_mut().load(dst, address_expr, address);
    }

    pub fn branch(&mut self, target: Expression, address: Option<u64>) {
        self.block_mut().branch(target, address);
    }

    pub fn intrinsic<S: Into<String>>(&mut self, name: S, address: Option<u64>) {
        self.block_mut().intrinsic(name, address);
    }

    pub fn nop(&mut self, address: Option<u64>) {
        self.block_mut().nop(address);
    }

    fn block_mut(&mut self) -> &mut crate::il::Block {
        self.registry
            .cfg_mut()
            .block_mut(self.block)
            .expect("translation context points at a missing block")
    }

    /// See [`JumpTargetRegistry::materialize`].
    pub fn materialize(
        &mut self,
        address: u64,
        reliable: bool,
        reasons: JumpTargetReason,
    ) -> Option<usize> {
        self.registry.materialize(address, reliable, reasons)
    }

    /// See [`JumpTargetRegistry::new_target`].
    pub fn new_target(&mut self, address: u64) -> Option<(usize, bool)> {
        self.registry.new_target(address)
    }

    /// See [`JumpTargetRegistry::unvisit`].
    pub fn unvisit(&mut self, block: usize) {
        self.registry.unvisit(block);
    }

    pub fn is_reliable_pc(&self, address: u64) -> bool {
        self.registry.is_reliable_pc(address)
    }

    /// Add an unconditional edge between blocks.
    pub fn unconditional_edge(&mut self, head: usize, tail: usize) -> Result<(), Error> {
        self.registry.cfg_mut().unconditional_edge(head, tail)
    }

    /// Add a conditional edge between blocks.
    pub fn conditional_edge(
        &mut self,
        head: usize,
        tail: usize,
        condition: Expression,
    ) -> Result<(), Error> {
        self.registry.cfg_mut().conditional_edge(head, tail, condition)
    }

    /// Route the current block's exit to the dispatcher, for control
    /// transfers whose destination is unknown at translation time.
    pub fn exit_to_dispatcher(&mut self, condition: Option<Expression>) -> Result<(), Error> {
        match condition {
            Some(condition) => {
                self.registry
                    .cfg_mut()
                    .conditional_edge(self.block, self.dispatcher.block(), condition)
            }
            None => self
                .registry
                .cfg_mut()
                .unconditional_edge(self.block, self.dispatcher.block()),
        }
    }
}

/// How a block in the recovered program should be treated by downstream
/// passes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BlockTag {
    /// The block starts at a registered jump target.
    JumpTarget { address: u64 },
    /// Translated code that is not a jump-target head, such as an anonymous
    /// block created while lowering multiway control flow.
    Translated { address: Option<u64> },
    /// The dispatcher block.
    Dispatcher,
    /// The sink for program counters outside every executable range.
    UnexpectedPc,
    /// The sink for program counters no dispatcher arm matches.
    DispatcherFail,
}

impl BlockTag {
    /// The address this block was translated from, when it has one.
    pub fn address(&self) -> Option<u64> {
        match self {
            BlockTag::JumpTarget { address } => Some(*address),
            BlockTag::Translated { address } => *address,
            _ => None,
        }
    }

    pub fn is_jump_target_head(&self) -> bool {
        matches!(self, BlockTag::JumpTarget { .. })
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(
            self,
            BlockTag::Dispatcher | BlockTag::UnexpectedPc | BlockTag::DispatcherFail
        )
    }
}

/// Ties registry, dispatcher, harvester, and resolver together in a single
/// exploration loop.
pub struct ExplorationDriver<'a> {
    image: &'a Image,
    architecture: Architecture,
    registry: JumpTargetRegistry,
    dispatcher: Dispatcher,
    recognizers: Vec<Box<dyn TableRecognizer>>,
    harvested: bool,
}

impl<'a> ExplorationDriver<'a> {
    pub fn new(image: &'a Image, architecture: Architecture) -> ExplorationDriver<'a> {
        let mut registry = JumpTargetRegistry::new(image, &architecture);
        let dispatcher = Dispatcher::new(registry.cfg_mut(), &architecture);
        ExplorationDriver {
            image,
            architecture,
            registry,
            dispatcher,
            recognizers: Vec::new(),
            harvested: false,
        }
    }

    /// Add a jump-table recognizer. Recognizers run over every block a
    /// translation fills, and their candidates are explored like any other
    /// target.
    pub fn add_recognizer(&mut self, recognizer: Box<dyn TableRecognizer>) {
        self.recognizers.push(recognizer);
    }

    pub fn registry(&self) -> &JumpTargetRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Explore from the given entry point until no unexplored targets
    /// remain, then finalize the dispatcher's arms.
    ///
    /// Harvesting runs at most once per driver, even across multiple `run`
    /// calls with different entry points.
    pub fn run(&mut self, translator: &mut dyn Translator, entry: u64) -> Result<(), Error> {
        let entry_block = self
            .registry
            .materialize(entry, true, JumpTargetReason::ENTRY_POINT)
            .ok_or_else(|| {
                Error::Custom(format!("entry point 0x{:x} is not valid code", entry))
            })?;
        if self.registry.cfg().entry().is_none() {
            self.registry.cfg_mut().set_entry(entry_block)?;
        }

        if !self.harvested {
            harvest_image(&mut self.registry, self.image, &self.architecture);
            self.harvested = true;
        }

        loop {
            while let Some((address, block)) = self.registry.pop_unexplored() {
                debug!("translating jump target 0x{:x}", address);
                let mut context = TranslationContext::new(
                    &mut self.registry,
                    &self.dispatcher,
                    self.image,
                    &self.architecture,
                    block,
                );
                let translated = translator.translate(&mut context, address)?;
                let filled = context.filled;

                if !translated {
                    warn!(
                        "nothing translated at 0x{:x}, routing to the unexpected-PC sink",
                        address
                    );
                    if !self
                        .registry
                        .cfg()
                        .has_edge(block, self.dispatcher.unexpected_pc())
                    {
                        self.registry
                            .cfg_mut()
                            .unconditional_edge(block, self.dispatcher.unexpected_pc())
                            .expect("could not route abandoned block");
                    }
                    continue;
                }

                for index in filled {
                    for recognizer in &self.recognizers {
                        let block = match self.registry.cfg().block(index) {
                            Ok(block) => block,
                            Err(_) => continue,
                        };
                        let candidates =
                            recognizer.recognize(block, self.image, &self.architecture);
                        for candidate in candidates {
                            self.registry.materialize(
                                candidate,
                                false,
                                JumpTargetReason::SUM_JUMP,
                            );
                        }
                    }
                }
            }

            // resolution can register targets the loop has not seen yet;
            // keep going until it stops producing work
            resolve_direct_branches(&mut self.registry, &self.dispatcher, &self.architecture);
            if self.registry.is_exhausted() {
                break;
            }
        }

        let targets: Vec<(u64, usize)> = self
            .registry
            .targets()
            .iter()
            .map(|(address, entry)| (*address, entry.block()))
            .collect();
        for (address, block) in targets {
            self.dispatcher
                .add_arm(self.registry.cfg_mut(), address, block)?;
        }

        Ok(())
    }

    /// Consume the driver and produce the recovered program.
    pub fn finish(self) -> RecoveredProgram {
        let mut tags = FxHashMap::default();
        for block in self.registry.cfg().blocks() {
            let index = block.index();
            let tag = if index == self.dispatcher.block() {
                BlockTag::Dispatcher
            } else if index == self.dispatcher.unexpected_pc() {
                BlockTag::UnexpectedPc
            } else if index == self.dispatcher.fail() {
                BlockTag::DispatcherFail
            } else if let Some(address) = self.registry.block_address(index) {
                BlockTag::JumpTarget { address }
            } else {
                BlockTag::Translated {
                    address: block.address(),
                }
            };
            tags.insert(index, tag);
        }

        let block_addresses = self.registry.block_addresses().clone();
        let targets = self.registry.targets().clone();
        let dispatcher = self.dispatcher;
        let cfg = self.registry.into_cfg();

        RecoveredProgram {
            cfg,
            tags,
            targets,
            block_addresses,
            dispatcher,
        }
    }
}

/// The finished product of an exploration: the control flow graph, a
/// classification for every block, per-address reliability, and the
/// identities of the dispatcher and its sinks.
pub struct RecoveredProgram {
    cfg: ControlFlowGraph,
    tags: FxHashMap<usize, BlockTag>,
    targets: BTreeMap<u64, JumpTargetEntry>,
    block_addresses: FxHashMap<usize, u64>,
    dispatcher: Dispatcher,
}

impl RecoveredProgram {
    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    /// The classification of a block.
    pub fn tag(&self, block: usize) -> Option<&BlockTag> {
        self.tags.get(&block)
    }

    /// Every registered jump target, ordered by address.
    pub fn targets(&self) -> &BTreeMap<u64, JumpTargetEntry> {
        &self.targets
    }

    /// The block registered for an address, exact match.
    pub fn block_at(&self, address: u64) -> Option<usize> {
        self.targets.get(&address).map(|entry| entry.block())
    }

    /// True if the nearest jump target at or before the address is
    /// reliable.
    pub fn is_reliable_pc(&self, address: u64) -> bool {
        self.targets
            .range(..=address)
            .next_back()
            .map(|(_, entry)| entry.reliable())
            .unwrap_or(false)
    }

    /// Why an address was recorded as a jump target.
    pub fn reasons(&self, address: u64) -> Option<JumpTargetReason> {
        self.targets.get(&address).map(|entry| entry.reasons())
    }

    /// Summarize a block's outgoing edges.
    pub fn successors(&self, block: usize) -> Successors {
        successors_of(&self.cfg, &self.block_addresses, &self.dispatcher, block)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

//! Control-flow recovery.
//!
//! Recovery is an open-ended exploration over raw bytes, driven by a queue
//! of unexplored jump targets. The entry point and harvested code pointers
//! seed the queue; the driver pops entries and hands their placeholder
//! blocks to the external translator, which discovers further addresses as
//! it lifts and reports them back through the registry. When the queue
//! drains, the dispatcher's arms are finalized and every indirect exit with
//! a statically known destination is rewritten into a direct edge.
//!
//! The pieces:
//!
//! * [`JumpTargetRegistry`] owns the address→block map, reliability and
//! visited state, the unexplored queue, and block splitting.
//! * [`Dispatcher`] is the catch-all multiway branch for unresolved
//! indirect exits, with its unexpected-PC and failure sinks.
//! * [`harvest_image`] scans segment data for plausible code pointers;
//! [`TableRecognizer`]s enumerate recognized jump tables.
//! * [`resolve_direct_branches`] converts statically known indirect exits
//! into direct edges.
//! * [`ExplorationDriver`] runs the loop and produces a
//! [`RecoveredProgram`].
//!
//! Everything is single-threaded and synchronous: registry, dispatcher,
//! and translator are invoked in strict turns from the driver loop, and
//! the registry callbacks are safe to call re-entrantly from within a
//! translation.

mod dispatcher;
mod driver;
mod harvest;
mod registry;
mod resolve;

pub use self::dispatcher::Dispatcher;
pub use self::driver::{
    BlockTag, ExplorationDriver, RecoveredProgram, TranslationContext, Translator,
};
pub use self::harvest::{harvest_image, SumJumpRecognizer, TableRecognizer};
pub use self::registry::{
    JumpTargetEntry, JumpTargetReason, JumpTargetRegistry, Successors,
};
pub use self::resolve::resolve_direct_branches;

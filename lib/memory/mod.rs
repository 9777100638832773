//! The memory image Condor recovers control flow from.
//!
//! An [`Image`] is an immutable collection of permissioned [`Segment`]s,
//! supplied once by the caller (typically from a loader) and used in a
//! read-only fashion afterwards. The recovery engine only ever asks three
//! kinds of questions of it: range containment, permissions, and integer
//! reads at an address.

mod image;

pub use self::image::{Image, Segment};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// RWX permissions for memory.
    #[derive(Deserialize, Serialize)]
    pub struct MemoryPermissions: u32 {
        const NONE    = 0b000;
        const READ    = 0b001;
        const WRITE   = 0b010;
        const EXECUTE = 0b100;
        const ALL     = 0b111;
    }
}

//! Loading executable binaries into a memory [`Image`](crate::memory::Image).
//!
//! Loading is a convenience for callers, not part of the recovery core: the
//! engine only ever sees the resulting `Image`. Anything that can produce an
//! `Image` (a custom format, a memory dump, a unit test) can feed the engine
//! directly.

pub mod elf;

pub use self::elf::Elf;

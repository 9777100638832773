//! Types used across multiple Condor modules.

use serde::{Deserialize, Serialize};

/// The endianness of a memory image.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Endian {
    Big,
    Little,
}

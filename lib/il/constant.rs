//! A `Constant` holds a single value.
//!
//! Values up to 64 bits are supported, which covers code pointers on every
//! input architecture Condor handles.

use crate::il::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A constant value.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Constant {
    value: u64,
    bits: usize,
}

impl Constant {
    /// Create a new `Constant` with the given value and bitness.
    pub fn new(value: u64, bits: usize) -> Constant {
        Constant { value, bits }
    }

    /// Get the value of this `Constant`, masked to its bitness.
    pub fn value(&self) -> u64 {
        if self.bits >= 64 {
            self.value
        } else {
            self.value & ((1 << self.bits) - 1)
        }
    }

    /// Get the number of bits for this `Constant`.
    pub fn bits(&self) -> usize {
        self.bits
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:X}:{}", self.value(), self.bits)
    }
}

impl From<Constant> for Expression {
    fn from(constant: Constant) -> Expression {
        Expression::constant(constant)
    }
}

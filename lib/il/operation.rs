use crate::il::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An IL Operation updates some state.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Operation {
    /// Assign the value given in expression to the scalar indicated.
    Assign { dst: Scalar, src: Expression },
    /// Store the value given by expression at the address given.
    Store { address: Expression, src: Expression },
    /// Load the value at the address given and place the result in dst.
    Load { dst: Scalar, address: Expression },
    /// Branch to the value given by target. Emitted only for indirect
    /// control transfers; direct branches become edges in the graph.
    Branch { target: Expression },
    /// An opaque call to an external helper. Helpers may read and write any
    /// register, including the program counter.
    Intrinsic { name: String },
    /// Does nothing. Provides an operation with a location when nothing
    /// needs to happen at that location.
    Nop,
}

impl Operation {
    pub fn assign(dst: Scalar, src: Expression) -> Operation {
        Operation::Assign { dst, src }
    }

    pub fn store(address: Expression, src: Expression) -> Operation {
        Operation::Store { address, src }
    }

    pub fn load(dst: Scalar, address: Expression) -> Operation {
        Operation::Load { dst, address }
    }

    pub fn branch(target: Expression) -> Operation {
        Operation::Branch { target }
    }

    pub fn intrinsic<S: Into<String>>(name: S) -> Operation {
        Operation::Intrinsic { name: name.into() }
    }

    pub fn nop() -> Operation {
        Operation::Nop
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Operation::Branch { .. })
    }

    pub fn is_intrinsic(&self) -> bool {
        matches!(self, Operation::Intrinsic { .. })
    }

    /// The scalar this operation writes, if any. `Intrinsic` returns `None`
    /// even though helpers may clobber registers; callers which care about
    /// helper side effects must treat `Intrinsic` as opaque.
    pub fn scalar_written(&self) -> Option<&Scalar> {
        match self {
            Operation::Assign { dst, .. } | Operation::Load { dst, .. } => Some(dst),
            Operation::Store { .. }
            | Operation::Branch { .. }
            | Operation::Intrinsic { .. }
            | Operation::Nop => None,
        }
    }

    /// The scalars read by this operation.
    pub fn scalars_read(&self) -> Vec<&Scalar> {
        match self {
            Operation::Assign { src, .. } => src.collect_scalars(),
            Operation::Store { address, src } => {
                let mut scalars = address.collect_scalars();
                scalars.append(&mut src.collect_scalars());
                scalars
            }
            Operation::Load { address, .. } => address.collect_scalars(),
            Operation::Branch { target } => target.collect_scalars(),
            Operation::Intrinsic { .. } | Operation::Nop => Vec::new(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Assign { dst, src } => write!(f, "{} = {}", dst, src),
            Operation::Store { address, src } => write!(f, "[{}] = {}", address, src),
            Operation::Load { dst, address } => write!(f, "{} = [{}]", dst, address),
            Operation::Branch { target } => write!(f, "branch {}", target),
            Operation::Intrinsic { name } => write!(f, "intrinsic {}", name),
            Operation::Nop => write!(f, "nop"),
        }
    }
}

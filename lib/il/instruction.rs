use crate::il::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An `Instruction` gives an `Operation` a position within a `Block`, and an
/// optional address in the original binary.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Instruction {
    operation: Operation,
    index: u64,
    comment: Option<String>,
    address: Option<u64>,
}

impl Instruction {
    pub(crate) fn new(index: u64, operation: Operation) -> Instruction {
        Instruction {
            operation,
            index,
            comment: None,
            address: None,
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn operation_mut(&mut self) -> &mut Operation {
        &mut self.operation
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
    }

    /// The address of the original instruction this operation was lifted
    /// from, when known.
    pub fn address(&self) -> Option<u64> {
        self.address
    }

    pub fn set_address(&mut self, address: Option<u64>) {
        self.address = address;
    }

    pub fn clone_new_index(&self, index: u64) -> Instruction {
        Instruction {
            operation: self.operation.clone(),
            index,
            comment: self.comment.clone(),
            address: self.address,
        }
    }

    pub fn is_branch(&self) -> bool {
        self.operation.is_branch()
    }

    pub fn is_intrinsic(&self) -> bool {
        self.operation.is_intrinsic()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let prefix = match self.address {
            Some(address) => format!("{:08X} {:02X} {}", address, self.index, self.operation),
            None => format!("{:02X} {}", self.index, self.operation),
        };
        if let Some(ref comment) = self.comment {
            write!(f, "{} // {}", prefix, comment)
        } else {
            write!(f, "{}", prefix)
        }
    }
}

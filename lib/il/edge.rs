//! An `Edge` is a directed edge between `Block`s in a `ControlFlowGraph`.
//!
//! An `Edge` has an optional condition. When the condition is present, the
//! edge is guarded by it: the condition is an `Expression` which must
//! evaluate to a 1-bit value, and the edge is taken when that value is 1.
//! When the condition is absent the edge is unconditional.
//!
//! To create a new edge, call `ControlFlowGraph::unconditional_edge` or
//! `ControlFlowGraph::conditional_edge`.

use crate::graph;
use crate::il::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Edge between IL blocks.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Edge {
    head: usize,
    tail: usize,
    condition: Option<Expression>,
}

impl Edge {
    pub(crate) fn new(head: usize, tail: usize, condition: Option<Expression>) -> Edge {
        Edge {
            head,
            tail,
            condition,
        }
    }

    /// Retrieve the condition for this `Edge`.
    pub fn condition(&self) -> Option<&Expression> {
        self.condition.as_ref()
    }

    /// Retrieve the index of the head `Block` for this `Edge`.
    pub fn head(&self) -> usize {
        self.head
    }

    /// Retrieve the index of the tail `Block` for this `Edge`.
    pub fn tail(&self) -> usize {
        self.tail
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.condition {
            Some(ref condition) => {
                write!(f, "(0x{:X}->0x{:X}) ? ({})", self.head, self.tail, condition)
            }
            None => write!(f, "(0x{:X}->0x{:X})", self.head, self.tail),
        }
    }
}

impl graph::Edge for Edge {
    fn head(&self) -> usize {
        self.head
    }
    fn tail(&self) -> usize {
        self.tail
    }
}

//! Condor Intermediate Language.
//!
//! Condor IL is a small, expression-based IL, just rich enough for
//! control-flow recovery. Translators lift the instructions they decode into
//! IL operations; the recovery engine never interprets the full semantics of
//! those operations, but it does inspect them to find writes to the program
//! counter, opaque helper calls, and jump-table access patterns.
//!
//! # Components of the IL
//!
//! * `Constant` and `Scalar` are the terminals: a value and a named
//! variable.
//! * `Expression` builds arithmetic, bitwise, comparison and width-changing
//! operations over the terminals.
//! * `Operation` updates state: `Assign`, `Store`, `Load`, `Branch` (an
//! indirect control transfer on an expression target), `Intrinsic` (an
//! opaque call to an external helper, which may clobber any register,
//! including the program counter), and `Nop`.
//! * `Instruction` gives an `Operation` a position within a `Block` and an
//! optional address in the original binary.
//! * `Block`, `Edge` and `ControlFlowGraph` hold the recovered program.
//! Direct branches are not represented as operations; they become edges in
//! the graph, optionally guarded by a condition. `Branch` is emitted only
//! for indirect control transfers.

mod block;
mod constant;
mod control_flow_graph;
mod edge;
mod expression;
mod instruction;
mod operation;
mod scalar;

pub use self::block::*;
pub use self::constant::*;
pub use self::control_flow_graph::*;
pub use self::edge::*;
pub use self::expression::*;
pub use self::instruction::*;
pub use self::operation::*;
pub use self::scalar::*;

/// A convenience function to create a new constant.
pub fn const_(value: u64, bits: usize) -> Constant {
    Constant::new(value, bits)
}

/// A convenience function to create a new constant expression.
pub fn expr_const(value: u64, bits: usize) -> Expression {
    Expression::constant(Constant::new(value, bits))
}

/// A convenience function to create a new scalar.
pub fn scalar<S>(name: S, bits: usize) -> Scalar
where
    S: Into<String>,
{
    Scalar::new(name, bits)
}

/// A convenience function to create a new scalar expression.
pub fn expr_scalar<S>(name: S, bits: usize) -> Expression
where
    S: Into<String>,
{
    Expression::scalar(Scalar::new(name, bits))
}

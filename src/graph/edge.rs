//! Defines `EdgeKind`, the reason one node cannot precede another.

use serde::Serialize;

/// Describes what kind of reference produced a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EdgeKind {
    /// A variable read, possibly through plain algebraic definitions.
    /// Example: `y' = x + 1` depends on the state computing `x`.
    Variable,
    /// A random draw read from its slot.
    Random,
    /// A custom operator instance (e.g. a delay line) read from its slot.
    Operator,
    /// An explicit computed-slot read.
    Slot,
}

impl EdgeKind {
    pub fn label(&self) -> &'static str {
        match self {
            EdgeKind::Variable => "var",
            EdgeKind::Random => "rand",
            EdgeKind::Operator => "op",
            EdgeKind::Slot => "slot",
        }
    }
}

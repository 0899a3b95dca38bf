//! error.rs
//! Fatal compilation errors. Every variant aborts the whole compilation.

use crate::store::types::{DataKey, StateId, VarId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// An instruction kind with no signature or dependency rule.
    #[error("Unsupported construct: {construct}")]
    UnsupportedConstruct { construct: String },

    /// A state referenced a key that no registered state ever provided.
    #[error("Dangling reference to {key} (referenced by {referrers:?})")]
    DanglingReference { key: DataKey, referrers: Vec<String> },

    /// The scheduler (or definition expansion) finished with unresolved entries.
    #[error("Cycle detected among {remaining:?}")]
    CycleDetected { remaining: Vec<String>, cycle: Vec<String> },

    #[error("Malformed expression: {reason}")]
    MalformedExpression { reason: String },

    #[error("Unknown variable {0:?}")]
    UnknownVariable(VarId),

    #[error("Unknown state {0:?}")]
    UnknownState(StateId),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl CompileError {
    pub fn unsupported(construct: impl Into<String>) -> Self {
        Self::UnsupportedConstruct { construct: construct.into() }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedExpression { reason: reason.into() }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

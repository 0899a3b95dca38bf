//! model.rs
//! Variable metadata exposed by the modeling library.

use super::instruction::Expression;
use super::types::VarId;
use crate::error::{CompileError, CompileResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableFlags {
    pub input: bool,
    pub output: bool,
    pub once: bool,
    pub integrated: bool,
}

impl VariableFlags {
    pub const NONE: Self = Self { input: false, output: false, once: false, integrated: false };
    pub const INPUT: Self = Self { input: true, ..Self::NONE };
    pub const OUTPUT: Self = Self { output: true, ..Self::NONE };
    pub const ONCE: Self = Self { once: true, ..Self::NONE };
    pub const INTEGRATED: Self = Self { integrated: true, ..Self::NONE };

    /// Flags that force storage regardless of whether a state writes the variable.
    pub fn forces_storage(&self) -> bool {
        self.input || self.output || self.once
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub flags: VariableFlags,
    pub definition: Option<Expression>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub variables: Vec<Variable>,
}

impl Model {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.variables.len() }

    pub fn add_variable(&mut self, name: &str, flags: VariableFlags, definition: Option<Expression>) -> VarId {
        let id = VarId::new(self.variables.len());
        self.variables.push(Variable { name: name.to_string(), flags, definition });
        id
    }

    pub fn get(&self, id: VarId) -> CompileResult<&Variable> {
        self.variables.get(id.index()).ok_or(CompileError::UnknownVariable(id))
    }

    pub fn definition(&self, id: VarId) -> Option<&Expression> {
        self.variables.get(id.index()).and_then(|v| v.definition.as_ref())
    }

    pub fn name(&self, id: VarId) -> &str {
        self.variables.get(id.index()).map(|v| v.name.as_str()).unwrap_or("?")
    }

    pub fn find(&self, name: &str) -> Option<VarId> {
        self.variables.iter().position(|v| v.name == name).map(VarId::new)
    }
}

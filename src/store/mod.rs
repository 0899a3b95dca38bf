//! Data model consumed from the modeling library: vocabulary, variables, states.
pub mod instruction;
pub mod model;
pub mod registry;
pub mod types;

pub use instruction::{Expression, Instruction, MathFn, MathOp, OperatorKind};
pub use model::{Model, Variable, VariableFlags};
pub use registry::StateRegistry;
pub use types::{ClusterId, DataKey, OperatorId, Phase, RandId, Role, StateId, Target, VarId, View};

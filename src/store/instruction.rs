//! instruction.rs
//! The postfix instruction vocabulary shared with the modeling library.

use super::types::{ClusterId, OperatorId, RandId, StateId, VarId};
use crate::error::{CompileError, CompileResult};
use serde::{Deserialize, Serialize};

/// Builtin operators. The numeric id is stable and sizes the signature code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MathOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Negate,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Equal,
    And,
    Or,
    Not,
    Ternary,
}

impl MathOp {
    pub const COUNT: u32 = 16;

    pub fn id(&self) -> u32 { *self as u32 }

    pub fn arity(&self) -> usize {
        match self {
            MathOp::Negate | MathOp::Not => 1,
            MathOp::Ternary => 3,
            _ => 2,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            MathOp::Add => "+",
            MathOp::Subtract => "-",
            MathOp::Multiply => "*",
            MathOp::Divide => "/",
            MathOp::Modulo => "%",
            MathOp::Power => "^",
            MathOp::Negate => "neg",
            MathOp::Greater => ">",
            MathOp::Less => "<",
            MathOp::GreaterEqual => ">=",
            MathOp::LessEqual => "<=",
            MathOp::Equal => "==",
            MathOp::And => "&&",
            MathOp::Or => "||",
            MathOp::Not => "!",
            MathOp::Ternary => "?:",
        }
    }

    /// Evaluates the operator on `args` (length equals `arity()`).
    pub fn apply(&self, args: &[f64]) -> f64 {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            MathOp::Add => args[0] + args[1],
            MathOp::Subtract => args[0] - args[1],
            MathOp::Multiply => args[0] * args[1],
            MathOp::Divide => args[0] / args[1],
            MathOp::Modulo => args[0] % args[1],
            MathOp::Power => args[0].powf(args[1]),
            MathOp::Negate => -args[0],
            MathOp::Greater => truth(args[0] > args[1]),
            MathOp::Less => truth(args[0] < args[1]),
            MathOp::GreaterEqual => truth(args[0] >= args[1]),
            MathOp::LessEqual => truth(args[0] <= args[1]),
            MathOp::Equal => truth(args[0] == args[1]),
            MathOp::And => truth(args[0] != 0.0 && args[1] != 0.0),
            MathOp::Or => truth(args[0] != 0.0 || args[1] != 0.0),
            MathOp::Not => truth(args[0] == 0.0),
            MathOp::Ternary => if args[0] != 0.0 { args[1] } else { args[2] },
        }
    }
}

/// Builtin functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MathFn {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Abs,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Hypot,
}

impl MathFn {
    pub const COUNT: u32 = 21;

    pub fn id(&self) -> u32 { *self as u32 }

    pub fn arity(&self) -> usize {
        match self {
            MathFn::Atan2 | MathFn::Min | MathFn::Max | MathFn::Hypot => 2,
            _ => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Tan => "tan",
            MathFn::Asin => "asin",
            MathFn::Acos => "acos",
            MathFn::Atan => "atan",
            MathFn::Atan2 => "atan2",
            MathFn::Sinh => "sinh",
            MathFn::Cosh => "cosh",
            MathFn::Tanh => "tanh",
            MathFn::Sqrt => "sqrt",
            MathFn::Exp => "exp",
            MathFn::Ln => "ln",
            MathFn::Log10 => "log10",
            MathFn::Abs => "abs",
            MathFn::Floor => "floor",
            MathFn::Ceil => "ceil",
            MathFn::Round => "round",
            MathFn::Min => "min",
            MathFn::Max => "max",
            MathFn::Hypot => "hypot",
        }
    }

    pub fn apply(&self, args: &[f64]) -> f64 {
        match self {
            MathFn::Sin => args[0].sin(),
            MathFn::Cos => args[0].cos(),
            MathFn::Tan => args[0].tan(),
            MathFn::Asin => args[0].asin(),
            MathFn::Acos => args[0].acos(),
            MathFn::Atan => args[0].atan(),
            MathFn::Atan2 => args[0].atan2(args[1]),
            MathFn::Sinh => args[0].sinh(),
            MathFn::Cosh => args[0].cosh(),
            MathFn::Tanh => args[0].tanh(),
            MathFn::Sqrt => args[0].sqrt(),
            MathFn::Exp => args[0].exp(),
            MathFn::Ln => args[0].ln(),
            MathFn::Log10 => args[0].log10(),
            MathFn::Abs => args[0].abs(),
            MathFn::Floor => args[0].floor(),
            MathFn::Ceil => args[0].ceil(),
            MathFn::Round => args[0].round(),
            MathFn::Min => args[0].min(args[1]),
            MathFn::Max => args[0].max(args[1]),
            MathFn::Hypot => args[0].hypot(args[1]),
        }
    }
}

/// How a custom operator participates in structural matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    /// Reads a delay-line slot; behaves like an operand.
    Delayed,
    /// Anything else; has no signature rule.
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Number(f64),
    Variable(VarId),
    Operator(MathOp),
    Function(MathFn),
    CustomFunction { name: String, arity: u16 },
    CustomOperator { id: OperatorId, name: String, kind: OperatorKind },
    Rand(RandId),
    /// Reads the slot written by another state.
    Slot(StateId),
    /// Calls a cluster's shared routine with `arity` stacked arguments.
    Routine { cluster: ClusterId, arity: u16 },
    /// Routine parameter inside a cluster prototype.
    Argument(u16),
}

impl Instruction {
    /// True for instructions that collapse to the shared placeholder code.
    pub fn is_operand(&self) -> bool {
        matches!(
            self,
            Instruction::Number(_)
                | Instruction::Variable(_)
                | Instruction::Rand(_)
                | Instruction::Slot(_)
                | Instruction::Argument(_)
                | Instruction::CustomOperator { kind: OperatorKind::Delayed, .. }
        )
    }

    /// (pops, pushes)
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Instruction::Operator(op) => (op.arity(), 1),
            Instruction::Function(f) => (f.arity(), 1),
            Instruction::CustomFunction { arity, .. } => (*arity as usize, 1),
            Instruction::Routine { arity, .. } => (*arity as usize, 1),
            _ => (0, 1),
        }
    }

    /// Operand identity. Literals compare bitwise so `0.0` and `-0.0` stay distinct.
    pub fn same_operand(&self, other: &Instruction) -> bool {
        match (self, other) {
            (Instruction::Number(a), Instruction::Number(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

/// A formula in postfix form.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Expression {
    pub instructions: Vec<Instruction>,
}

impl From<Vec<Instruction>> for Expression {
    fn from(instructions: Vec<Instruction>) -> Self { Self { instructions } }
}

impl Expression {
    pub fn new() -> Self { Self::default() }
    pub fn number(value: f64) -> Self { Self::from(vec![Instruction::Number(value)]) }
    pub fn variable(v: VarId) -> Self { Self::from(vec![Instruction::Variable(v)]) }

    pub fn len(&self) -> usize { self.instructions.len() }
    pub fn is_empty(&self) -> bool { self.instructions.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> { self.instructions.iter() }

    pub fn push(&mut self, instruction: Instruction) { self.instructions.push(instruction); }

    /// Joins several expressions with `+`. Multi-action states arrive this way.
    pub fn sum(parts: impl IntoIterator<Item = Expression>) -> Self {
        let mut out = Expression::new();
        for (i, part) in parts.into_iter().enumerate() {
            out.instructions.extend(part.instructions);
            if i > 0 {
                out.push(Instruction::Operator(MathOp::Add));
            }
        }
        out
    }

    /// Literal value, if the whole expression is a single number.
    pub fn as_literal(&self) -> Option<f64> {
        match self.instructions.as_slice() {
            [Instruction::Number(v)] => Some(*v),
            _ => None,
        }
    }

    /// Checks that the postfix program never underflows and leaves at most one value.
    pub fn validate(&self) -> CompileResult<()> {
        let mut depth: usize = 0;
        for (pos, instr) in self.instructions.iter().enumerate() {
            let (pops, pushes) = instr.stack_effect();
            if depth < pops {
                return Err(CompileError::malformed(format!(
                    "stack underflow at position {} ({:?})",
                    pos, instr
                )));
            }
            depth = depth - pops + pushes;
        }
        if depth > 1 {
            return Err(CompileError::malformed(format!("{} values left on the stack", depth)));
        }
        Ok(())
    }

    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        self.instructions.iter().filter_map(|i| match i {
            Instruction::Variable(v) => Some(*v),
            _ => None,
        })
    }
}

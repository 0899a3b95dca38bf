//! table.rs
//! Structural fingerprints of expressions.
//!
//! Code layout:
//! `0` placeholder | `1..=OPS` builtin operators | next `FNS` builtin functions |
//! lazily allocated codes for custom functions and routines.

use crate::error::{CompileError, CompileResult};
use crate::store::instruction::{Expression, Instruction, MathFn, MathOp, OperatorKind};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::trace;

pub const PLACEHOLDER: u32 = 0;
pub const OPERATOR_BASE: u32 = 1;
pub const FUNCTION_BASE: u32 = OPERATOR_BASE + MathOp::COUNT;
pub const CUSTOM_BASE: u32 = FUNCTION_BASE + MathFn::COUNT;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Signature(pub SmallVec<[u32; 16]>);

impl Signature {
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn codes(&self) -> &[u32] { &self.0 }

    /// Positions holding the placeholder code.
    pub fn placeholders(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().filter(|(_, c)| **c == PLACEHOLDER).map(|(i, _)| i)
    }
}

/// Session-scoped allocation table for custom codes.
#[derive(Debug, Clone)]
pub struct SignatureTable {
    codes: HashMap<String, u32>,
    next: u32,
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self { codes: HashMap::new(), next: CUSTOM_BASE }
    }
}

impl SignatureTable {
    pub fn new() -> Self { Self::default() }

    /// Number of custom codes handed out so far.
    pub fn allocated(&self) -> usize { self.codes.len() }

    pub fn reset(&mut self) {
        self.codes.clear();
        self.next = CUSTOM_BASE;
    }

    fn allocate(&mut self, key: String) -> u32 {
        if let Some(&code) = self.codes.get(&key) {
            return code;
        }
        let code = self.next;
        self.next += 1;
        trace!(key = %key, code, "allocated signature code");
        self.codes.insert(key, code);
        code
    }

    pub fn code(&mut self, instruction: &Instruction) -> CompileResult<u32> {
        Ok(match instruction {
            Instruction::Number(_)
            | Instruction::Variable(_)
            | Instruction::Rand(_)
            | Instruction::Slot(_)
            | Instruction::Argument(_) => PLACEHOLDER,
            Instruction::CustomOperator { kind: OperatorKind::Delayed, .. } => PLACEHOLDER,
            Instruction::CustomOperator { name, kind: OperatorKind::Opaque, .. } => {
                return Err(CompileError::unsupported(format!("custom operator `{}`", name)));
            }
            Instruction::Operator(op) => OPERATOR_BASE + op.id(),
            Instruction::Function(f) => FUNCTION_BASE + f.id(),
            Instruction::CustomFunction { name, .. } => self.allocate(format!("f:{}", name)),
            Instruction::Routine { cluster, .. } => self.allocate(format!("routine:{}", cluster.0)),
        })
    }

    pub fn signature(&mut self, expr: &Expression) -> CompileResult<Signature> {
        let mut codes = SmallVec::with_capacity(expr.len());
        for instruction in expr.iter() {
            codes.push(self.code(instruction)?);
        }
        Ok(Signature(codes))
    }
}

/// Human-readable, allocation-independent rendering of an expression's structure.
/// Used to order candidates deterministically.
pub fn shape_key(expr: &Expression) -> String {
    let tokens: Vec<String> = expr
        .iter()
        .map(|i| match i {
            i if i.is_operand() => "_".to_string(),
            Instruction::Operator(op) => op.symbol().to_string(),
            Instruction::Function(f) => f.name().to_string(),
            Instruction::CustomFunction { name, arity } => format!("{}/{}", name, arity),
            Instruction::Routine { cluster, arity } => format!("routine{}/{}", cluster.0, arity),
            Instruction::CustomOperator { name, .. } => format!("op:{}", name),
            _ => "?".to_string(),
        })
        .collect();
    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::types::{ClusterId, OperatorId, RandId, VarId};
    use Instruction::*;

    fn expr(v: Vec<Instruction>) -> Expression { Expression::from(v) }

    #[test]
    fn test_operands_share_placeholder() {
        let mut table = SignatureTable::new();
        // 2*x and 3*y
        let a = table.signature(&expr(vec![Number(2.0), Variable(VarId(0)), Operator(MathOp::Multiply)])).unwrap();
        let b = table.signature(&expr(vec![Number(3.0), Variable(VarId(1)), Operator(MathOp::Multiply)])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.codes(), &[0, 0, OPERATOR_BASE + MathOp::Multiply.id()]);
    }

    #[test]
    fn test_operator_identity_matters() {
        let mut table = SignatureTable::new();
        let mul = table.signature(&expr(vec![Number(2.0), Variable(VarId(0)), Operator(MathOp::Multiply)])).unwrap();
        let add = table.signature(&expr(vec![Number(2.0), Variable(VarId(0)), Operator(MathOp::Add)])).unwrap();
        assert_ne!(mul, add);
    }

    #[test]
    fn test_reserved_ranges_disjoint() {
        let mut table = SignatureTable::new();
        let last_op = table.code(&Operator(MathOp::Ternary)).unwrap();
        let first_fn = table.code(&Function(MathFn::Sin)).unwrap();
        let last_fn = table.code(&Function(MathFn::Hypot)).unwrap();
        let custom = table.code(&CustomFunction { name: "f".into(), arity: 1 }).unwrap();
        assert!(last_op < first_fn);
        assert!(last_fn < custom);
        assert_eq!(custom, CUSTOM_BASE);
    }

    #[test]
    fn test_custom_codes_stable_and_resettable() {
        let mut table = SignatureTable::new();
        let f = CustomFunction { name: "f".into(), arity: 1 };
        let g = CustomFunction { name: "g".into(), arity: 1 };
        let cf = table.code(&f).unwrap();
        let cg = table.code(&g).unwrap();
        assert_ne!(cf, cg);
        assert_eq!(table.code(&f).unwrap(), cf);
        assert_eq!(table.allocated(), 2);

        table.reset();
        assert_eq!(table.allocated(), 0);
        // After a reset, allocation starts over.
        assert_eq!(table.code(&g).unwrap(), CUSTOM_BASE);
    }

    #[test]
    fn test_routine_and_function_namespaces_disjoint() {
        let mut table = SignatureTable::new();
        let f = table.code(&CustomFunction { name: "0".into(), arity: 0 }).unwrap();
        let r = table.code(&Routine { cluster: ClusterId(0), arity: 0 }).unwrap();
        assert_ne!(f, r);
    }

    #[test]
    fn test_delayed_operator_is_operand_opaque_fails() {
        let mut table = SignatureTable::new();
        let delayed = CustomOperator { id: OperatorId(0), name: "delayed".into(), kind: OperatorKind::Delayed };
        assert_eq!(table.code(&delayed).unwrap(), PLACEHOLDER);
        assert_eq!(table.code(&Rand(RandId(0))).unwrap(), PLACEHOLDER);

        let opaque = CustomOperator { id: OperatorId(1), name: "pdf".into(), kind: OperatorKind::Opaque };
        let err = table.signature(&expr(vec![opaque])).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedConstruct { ref construct } if construct.contains("pdf")));
    }

    #[test]
    fn test_shape_key() {
        let e = expr(vec![Number(1.0), Variable(VarId(0)), Operator(MathOp::Add), Function(MathFn::Sin)]);
        assert_eq!(shape_key(&e), "_ _ + sin");
    }
}

//! precompute.rs
//! Expansion of non-persistent variables and constant folding, applied before signing.

use crate::error::{CompileError, CompileResult};
use crate::store::instruction::{Expression, Instruction};
use crate::store::model::Model;
use crate::store::types::VarId;

/// Result of the precompute pass on one expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Precomputed {
    pub expanded: Expression,
    /// Present only if folding changed something.
    pub folded: Option<Expression>,
}

impl Precomputed {
    /// The expressions to try as cluster candidates.
    pub fn candidates(&self) -> impl Iterator<Item = &Expression> {
        std::iter::once(&self.expanded).chain(self.folded.iter())
    }
}

/// Splices the definition of every non-persistent variable into `expr`, recursively.
pub fn expand<F>(expr: &Expression, model: &Model, is_persistent: F) -> CompileResult<Expression>
where
    F: Fn(VarId) -> bool,
{
    let mut out = Vec::with_capacity(expr.len());
    // Each frame walks one instruction list; `chain` holds the variables being expanded.
    let mut frames: Vec<(&[Instruction], usize)> = vec![(expr.instructions.as_slice(), 0)];
    let mut chain: Vec<VarId> = Vec::new();

    while let Some(frame) = frames.last_mut() {
        let (instrs, pos) = *frame;
        if pos >= instrs.len() {
            frames.pop();
            // The root frame has no variable in the chain.
            if !frames.is_empty() {
                chain.pop();
            }
            continue;
        }
        frame.1 += 1;
        let instr = &instrs[pos];

        let splice = match instr {
            Instruction::Variable(v) if !is_persistent(*v) => {
                model.definition(*v).filter(|d| !d.is_empty()).map(|d| (*v, d))
            }
            _ => None,
        };

        match splice {
            Some((v, def)) => {
                if let Some(start) = chain.iter().position(|c| *c == v) {
                    let cycle: Vec<String> = chain[start..].iter().map(|c| model.name(*c).to_string()).collect();
                    return Err(CompileError::CycleDetected { remaining: cycle.clone(), cycle });
                }
                chain.push(v);
                frames.push((def.instructions.as_slice(), 0));
            }
            None => out.push(instr.clone()),
        }
    }

    Ok(Expression::from(out))
}

/// Folds every builtin application whose operands are all literals.
///
/// One postfix pass reaches the fixed point: a folded result is itself a literal
/// operand for the enclosing application. Non-finite results are left unfolded.
pub fn fold(expr: &Expression) -> CompileResult<(Expression, bool)> {
    let mut out: Vec<Instruction> = Vec::with_capacity(expr.len());
    // Per stack value: literal value if the value is a single folded number.
    let mut stack: Vec<Option<f64>> = Vec::new();
    let mut changed = false;

    for (pos, instr) in expr.iter().enumerate() {
        let (pops, _) = instr.stack_effect();
        if stack.len() < pops {
            return Err(CompileError::malformed(format!("stack underflow at position {}", pos)));
        }
        let args_start = stack.len() - pops;

        let evaluated = match instr {
            Instruction::Operator(_) | Instruction::Function(_) if pops > 0 => {
                let literals: Option<Vec<f64>> = stack[args_start..].iter().copied().collect();
                literals
                    .map(|args| match instr {
                        Instruction::Operator(op) => op.apply(&args),
                        Instruction::Function(f) => f.apply(&args),
                        _ => f64::NAN,
                    })
                    .filter(|v| v.is_finite())
            }
            _ => None,
        };

        stack.truncate(args_start);
        match (evaluated, instr) {
            (Some(value), _) => {
                // Each literal operand is exactly one trailing instruction.
                out.truncate(out.len() - pops);
                out.push(Instruction::Number(value));
                stack.push(Some(value));
                changed = true;
            }
            (None, Instruction::Number(v)) => {
                out.push(instr.clone());
                stack.push(Some(*v));
            }
            (None, _) => {
                out.push(instr.clone());
                stack.push(None);
            }
        }
    }

    Ok((Expression::from(out), changed))
}

pub fn precompute<F>(expr: &Expression, model: &Model, is_persistent: F) -> CompileResult<Precomputed>
where
    F: Fn(VarId) -> bool,
{
    let expanded = expand(expr, model, is_persistent)?;
    let (folded, changed) = fold(&expanded)?;
    Ok(Precomputed { expanded, folded: changed.then_some(folded) })
}

//! resolve.rs
//! Maps the references inside an expression to the keys of the states governing them.

use super::edge::EdgeKind;
use crate::error::CompileResult;
use crate::store::instruction::{Expression, Instruction};
use crate::store::model::Model;
use crate::store::registry::StateRegistry;
use crate::store::types::{DataKey, Target, VarId};
use indexmap::IndexSet;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Initializers prefer the initial-value storage of what they read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Value,
    Initial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Referent {
    pub key: DataKey,
    pub kind: EdgeKind,
}

/// Per-session memo of the referents reached through a stateless variable's definition.
#[derive(Debug, Clone, Default)]
pub struct ReferentMemo {
    by_var: HashMap<(VarId, Stage), Rc<[Referent]>>,
}

impl ReferentMemo {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.by_var.len() }
    pub fn is_empty(&self) -> bool { self.by_var.is_empty() }
    pub fn clear(&mut self) { self.by_var.clear(); }
}

pub struct Resolver<'s> {
    pub registry: &'s StateRegistry,
    pub model: &'s Model,
    pub memo: &'s mut ReferentMemo,
}

impl<'s> Resolver<'s> {
    pub fn new(registry: &'s StateRegistry, model: &'s Model, memo: &'s mut ReferentMemo) -> Self {
        Self { registry, model, memo }
    }

    /// Key of the state governing `target` at `stage`, if any state writes it.
    fn governing(&self, target: Target, stage: Stage) -> Option<DataKey> {
        if stage == Stage::Initial {
            let initial = DataKey::initial(target);
            if self.registry.governing(&initial).is_some() {
                return Some(initial);
            }
        }
        let value = DataKey::value(target);
        self.registry.governing(&value).map(|_| value)
    }

    /// Every referent of `expr`, deduplicated, in first-seen order.
    pub fn referents(&mut self, expr: &Expression, stage: Stage) -> CompileResult<Vec<Referent>> {
        let mut out: IndexSet<Referent> = IndexSet::new();
        for instr in expr.iter() {
            match instr {
                Instruction::Variable(v) => {
                    let target = Target::Variable(*v);
                    match self.governing(target, stage) {
                        Some(key) => {
                            out.insert(Referent { key, kind: EdgeKind::Variable });
                        }
                        None => out.extend(self.through_definition(*v, stage)?.iter().copied()),
                    }
                }
                Instruction::Rand(r) => {
                    out.insert(Referent { key: DataKey::value(Target::Rand(*r)), kind: EdgeKind::Random });
                }
                Instruction::CustomOperator { id, .. } => {
                    let target = Target::Operator(*id);
                    let key = self.governing(target, stage).unwrap_or(DataKey::value(target));
                    out.insert(Referent { key, kind: EdgeKind::Operator });
                }
                Instruction::Slot(state) => {
                    let state = self.registry.check(*state)?;
                    out.insert(Referent { key: self.registry.key(state), kind: EdgeKind::Slot });
                }
                _ => {}
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Referents reached by walking the definition of a variable no state governs.
    fn through_definition(&mut self, var: VarId, stage: Stage) -> CompileResult<Rc<[Referent]>> {
        if let Some(hit) = self.memo.by_var.get(&(var, stage)) {
            return Ok(Rc::clone(hit));
        }

        let model = self.model;
        let mut found: IndexSet<Referent> = IndexSet::new();
        let mut visited: HashSet<VarId> = HashSet::from([var]);
        let mut worklist = vec![var];

        while let Some(current) = worklist.pop() {
            let Some(def) = model.definition(current) else { continue };
            for instr in def.iter() {
                match instr {
                    Instruction::Variable(w) => {
                        let target = Target::Variable(*w);
                        if let Some(key) = self.governing(target, stage) {
                            found.insert(Referent { key, kind: EdgeKind::Variable });
                        } else if let Some(hit) = self.memo.by_var.get(&(*w, stage)) {
                            found.extend(hit.iter().copied());
                        } else if visited.insert(*w) {
                            worklist.push(*w);
                        }
                    }
                    other => {
                        // Non-variable referents have no definitions to follow.
                        let single = Expression::from(vec![other.clone()]);
                        found.extend(self.referents(&single, stage)?);
                    }
                }
            }
        }

        let result: Rc<[Referent]> = found.into_iter().collect();
        self.memo.by_var.insert((var, stage), Rc::clone(&result));
        Ok(result)
    }
}

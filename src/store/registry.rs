use super::instruction::Expression;
use super::types::*;
use crate::error::{CompileError, CompileResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Columnar store of every state registered in a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateRegistry {
    // Columnar Arrays
    pub targets: Vec<Target>,
    pub roles: Vec<Role>,
    pub expressions: Vec<Expression>,
    pub names: Vec<String>,

    // Lookup helpers (not serialized, rebuilt on load)
    #[serde(skip)]
    pub used_names: HashSet<String>,
    #[serde(skip)]
    pub by_key: HashMap<DataKey, StateId>,
    #[serde(skip)]
    pub written: HashSet<VarId>,
}

impl StateRegistry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.targets.len() }
    pub fn is_empty(&self) -> bool { self.targets.is_empty() }

    /// Rebuilds the lookup helpers after deserialization.
    pub fn rebuild_caches(&mut self) {
        self.used_names = self.names.iter().cloned().collect();
        self.by_key.clear();
        self.written.clear();
        for i in 0..self.count() {
            if let Target::Variable(v) = self.targets[i] {
                self.written.insert(v);
            }
            let key = self.key(StateId::new(i));
            self.by_key.entry(key).or_insert(StateId::new(i));
        }
    }

    pub fn add_state(&mut self, target: Target, role: Role, expression: Expression, name: &str) -> StateId {
        let id = StateId::new(self.targets.len());

        // --- Unique Name Enforcement ---
        let mut candidate = name.to_string();
        let mut counter = 1;
        while self.used_names.contains(&candidate) {
            candidate = format!("{}_{}", name, counter);
            counter += 1;
        }
        self.used_names.insert(candidate.clone());
        // -------------------------------

        // First state to claim a key governs it.
        self.by_key.entry(DataKey::new(target, role.view())).or_insert(id);
        if let Target::Variable(v) = target {
            self.written.insert(v);
        }

        self.targets.push(target);
        self.roles.push(role);
        self.expressions.push(expression);
        self.names.push(candidate);

        id
    }

    pub fn check(&self, id: StateId) -> CompileResult<StateId> {
        if id.index() < self.count() { Ok(id) } else { Err(CompileError::UnknownState(id)) }
    }

    #[inline(always)]
    pub fn key(&self, id: StateId) -> DataKey {
        DataKey::new(self.targets[id.index()], self.roles[id.index()].view())
    }

    pub fn target(&self, id: StateId) -> Target { self.targets[id.index()] }
    pub fn role(&self, id: StateId) -> Role { self.roles[id.index()] }
    pub fn expression(&self, id: StateId) -> &Expression { &self.expressions[id.index()] }
    pub fn name(&self, id: StateId) -> &str { &self.names[id.index()] }

    /// The state governing `key`, if any state was registered under it.
    pub fn governing(&self, key: &DataKey) -> Option<StateId> {
        self.by_key.get(key).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = StateId> {
        (0..self.count()).map(StateId::new)
    }

    /// True if some state writes `var` in any view.
    pub fn targets_variable(&self, var: VarId) -> bool {
        self.written.contains(&var)
    }
}

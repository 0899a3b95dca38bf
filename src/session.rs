//! session.rs
//! One compilation. Owns the model, the registered states and every cache, so
//! independent compilations in one process never share tables.

use crate::cluster::{self, ClusterSet};
use crate::config::CompilerOptions;
use crate::error::CompileResult;
use crate::graph::{DependencyGraph, ReferentMemo, Resolver};
use crate::signature::{self, Precomputed, Signature, SignatureTable};
use crate::store::instruction::Expression;
use crate::store::model::Model;
use crate::store::registry::StateRegistry;
use crate::store::types::{Role, StateId, Target, VarId};
use indexmap::IndexSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Session {
    pub model: Model,
    pub registry: StateRegistry,
    pub options: CompilerOptions,
    signatures: SignatureTable,
    memo: ReferentMemo,
}

impl Session {
    pub fn new(model: Model, options: CompilerOptions) -> Self {
        Self { model, options: options.normalized(), ..Default::default() }
    }

    /// Registers a state. The expression must be well formed and a variable target must exist.
    pub fn add_state(&mut self, target: Target, role: Role, expression: Expression, name: &str) -> CompileResult<StateId> {
        expression.validate()?;
        if let Target::Variable(v) = target {
            self.model.get(v)?;
        }
        // Memoized referents depend on which keys have states.
        self.memo.clear();
        Ok(self.registry.add_state(target, role, expression, name))
    }

    /// A variable keeps its own storage if a state writes it or a flag demands it.
    pub fn is_persistent(&self, var: VarId) -> bool {
        let forced = self.model.get(var).map(|v| v.flags.forces_storage()).unwrap_or(false);
        forced || self.registry.targets_variable(var)
    }

    pub fn signature(&mut self, expr: &Expression) -> CompileResult<Signature> {
        self.signatures.signature(expr)
    }

    pub fn signature_table(&self) -> &SignatureTable { &self.signatures }
    pub fn referent_memo(&self) -> &ReferentMemo { &self.memo }

    pub fn expand(&self, expr: &Expression) -> CompileResult<Expression> {
        signature::expand(expr, &self.model, |v| self.is_persistent(v))
    }

    pub fn precompute(&self, state: StateId) -> CompileResult<Precomputed> {
        let state = self.registry.check(state)?;
        signature::precompute(self.registry.expression(state), &self.model, |v| self.is_persistent(v))
    }

    /// Mines clusters over every registered state.
    pub fn mine_clusters(&mut self) -> CompileResult<ClusterSet> {
        let states: Vec<StateId> = self.registry.ids().collect();
        self.mine_clusters_for(&states)
    }

    /// Mines clusters over `states`. Repeated ids count once.
    pub fn mine_clusters_for(&mut self, states: &[StateId]) -> CompileResult<ClusterSet> {
        let unique: IndexSet<StateId> = states.iter().copied().collect();
        let entries = unique
            .into_iter()
            .map(|s| Ok((s, self.precompute(s)?)))
            .collect::<CompileResult<Vec<_>>>()?;
        cluster::mine(&entries, &mut self.signatures, &self.options)
    }

    /// Builds the dependency graph over every registered state.
    pub fn build_graph(&mut self, clusters: Option<&ClusterSet>) -> CompileResult<DependencyGraph> {
        let states: Vec<StateId> = self.registry.ids().collect();
        self.build_graph_for(&states, clusters)
    }

    pub fn build_graph_for(&mut self, states: &[StateId], clusters: Option<&ClusterSet>) -> CompileResult<DependencyGraph> {
        let mut resolver = Resolver::new(&self.registry, &self.model, &mut self.memo);
        DependencyGraph::build(states.iter().copied(), &mut resolver, clusters)
    }

    /// Drops every cache so the next compilation starts clean. Registered states stay.
    pub fn reset(&mut self) {
        debug!(
            codes = self.signatures.allocated(),
            memoized = self.memo.len(),
            "resetting session caches"
        );
        self.signatures.reset();
        self.memo.clear();
    }
}

//! dag.rs
//! The "cannot precede" graph over every state to compute.
//!
//! States arrive one at a time. References to states that have not arrived yet are
//! parked in `unresolved` and wired up when the referenced key shows up.

use super::edge::EdgeKind;
use super::resolve::{Resolver, Stage};
use super::storage::{GraphStore, NodeId};
use crate::cluster::ClusterSet;
use crate::error::{CompileError, CompileResult};
use crate::store::types::{ClusterId, DataKey, Role, StateId, Target};
use indexmap::{IndexMap, IndexSet};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StateEntry {
    pub node: NodeId,
    pub target: Target,
    pub role: Role,
    pub name: String,
    /// Set only on cluster members; other states on the same node stay `None`.
    pub cluster: Option<ClusterId>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub(crate) store: GraphStore,
    node_of_key: HashMap<DataKey, NodeId>,
    states: IndexMap<StateId, StateEntry>,
    /// Nodes nothing depends on yet (children of the synthetic root).
    root: IndexSet<NodeId>,
    unresolved: IndexMap<DataKey, Vec<(NodeId, EdgeKind)>>,
    reach: RefCell<HashMap<NodeId, Rc<HashSet<NodeId>>>>,
}

impl DependencyGraph {
    pub fn new() -> Self { Self::default() }

    /// Builds the graph over `states` and checks that every reference resolved.
    pub fn build(
        states: impl IntoIterator<Item = StateId>,
        resolver: &mut Resolver<'_>,
        clusters: Option<&ClusterSet>,
    ) -> CompileResult<Self> {
        let mut graph = Self::new();
        for state in states {
            graph.add(state, resolver)?;
            if let Some(id) = clusters.and_then(|c| c.cluster_of(state)) {
                graph.set_cluster(state, id)?;
            }
        }
        graph.finish()
    }

    pub fn node_count(&self) -> usize { self.store.count() }
    pub fn edge_count(&self) -> usize { self.store.edge_count() }
    pub fn state_count(&self) -> usize { self.states.len() }

    /// Adds one state: collapses it onto an existing node with the same key, or
    /// creates a node and wires up every pending reference to that key.
    pub fn add(&mut self, state: StateId, resolver: &mut Resolver<'_>) -> CompileResult<NodeId> {
        let registry = resolver.registry;
        let state = registry.check(state)?;
        let key = registry.key(state);
        let target = registry.target(state);
        let role = registry.role(state);
        self.reach.get_mut().clear();

        let node = match self.node_of_key.get(&key) {
            Some(&existing) => {
                self.store.states[existing.index()].push(state);
                existing
            }
            None => {
                let node = self.store.push_node(key, state);
                self.node_of_key.insert(key, node);
                match self.unresolved.shift_remove(&key) {
                    Some(pending) => {
                        for (from, kind) in pending {
                            self.store.add_edge(from, node, kind);
                        }
                    }
                    None => {
                        self.root.insert(node);
                    }
                }
                node
            }
        };
        self.states.insert(
            state,
            StateEntry { node, target, role, name: registry.name(state).to_string(), cluster: None },
        );

        if self.is_bare_initializer(target, role, resolver) {
            return Ok(node);
        }

        let stage = if role == Role::Initialization { Stage::Initial } else { Stage::Value };
        let referents = resolver.referents(registry.expression(state), stage)?;
        for referent in referents {
            if role.allows_self_reference() && referent.key.target == target {
                continue;
            }
            match self.node_of_key.get(&referent.key) {
                Some(&dep) => {
                    self.root.shift_remove(&dep);
                    self.store.add_edge(node, dep, referent.kind);
                }
                None => {
                    self.unresolved.entry(referent.key).or_default().push((node, referent.kind));
                }
            }
        }
        Ok(node)
    }

    /// Initializers of input and once variables are set from outside.
    fn is_bare_initializer(&self, target: Target, role: Role, resolver: &Resolver<'_>) -> bool {
        match (role, target) {
            (Role::Initialization, Target::Variable(v)) => resolver
                .model
                .get(v)
                .map(|var| var.flags.input || var.flags.once)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Marks `state` as a member of `cluster`. The node keeps the first cluster
    /// seen for display; scheduling reads the per-state membership.
    pub fn set_cluster(&mut self, state: StateId, cluster: ClusterId) -> CompileResult<()> {
        let entry = self.states.get_mut(&state).ok_or(CompileError::UnknownState(state))?;
        entry.cluster = Some(cluster);
        let node = entry.node;
        self.store.clusters[node.index()].get_or_insert(cluster);
        Ok(())
    }

    pub fn state_cluster(&self, state: StateId) -> Option<ClusterId> {
        self.states.get(&state).and_then(|e| e.cluster)
    }

    /// Fails if any reference never found its state.
    pub fn finish(self) -> CompileResult<Self> {
        if let Some((key, pending)) = self.unresolved.first() {
            let referrers = pending.iter().map(|(n, _)| self.node_name(*n).to_string()).collect();
            return Err(CompileError::DanglingReference { key: *key, referrers });
        }
        debug!(
            nodes = self.node_count(),
            edges = self.edge_count(),
            states = self.state_count(),
            roots = self.root.len(),
            "dependency graph built"
        );
        Ok(self)
    }

    pub fn node_of(&self, state: StateId) -> CompileResult<NodeId> {
        self.states.get(&state).map(|e| e.node).ok_or(CompileError::UnknownState(state))
    }

    pub fn entry(&self, state: StateId) -> CompileResult<&StateEntry> {
        self.states.get(&state).ok_or(CompileError::UnknownState(state))
    }

    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.states.keys().copied()
    }

    pub fn contains(&self, state: StateId) -> bool { self.states.contains_key(&state) }

    pub fn key(&self, node: NodeId) -> DataKey { self.store.keys[node.index()] }
    pub fn cluster(&self, node: NodeId) -> Option<ClusterId> { self.store.clusters[node.index()] }
    pub fn node_states(&self, node: NodeId) -> &[StateId] { &self.store.states[node.index()] }

    pub fn node_name(&self, node: NodeId) -> &str {
        self.store.states[node.index()]
            .first()
            .and_then(|s| self.states.get(s))
            .map(|e| e.name.as_str())
            .unwrap_or("?")
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ { self.root.iter().copied() }

    pub fn dependencies(&self, node: NodeId) -> impl Iterator<Item = (NodeId, EdgeKind)> + '_ {
        self.store.dependencies(node)
    }

    pub fn dependents(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.store.dependents(node)
    }

    /// Nodes reachable from `start` over dependencies (breadth first). `start` is
    /// included only if a cycle leads back to it.
    pub fn reachable(&self, start: NodeId) -> Rc<HashSet<NodeId>> {
        if let Some(hit) = self.reach.borrow().get(&start) {
            return Rc::clone(hit);
        }

        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.store.dependencies(start).map(|(n, _)| n).collect();
        while let Some(node) = queue.pop_front() {
            if visited.insert(node) {
                queue.extend(self.store.dependencies(node).map(|(n, _)| n));
            }
        }

        let visited = Rc::new(visited);
        self.reach.borrow_mut().insert(start, Rc::clone(&visited));
        visited
    }

    /// True if computing `state` needs `target` first, or `state` is a derivative
    /// or constraint of `target` itself.
    pub fn depends_on(&self, state: StateId, target: &Target) -> CompileResult<bool> {
        let entry = self.entry(state)?;
        if entry.role.allows_self_reference() && entry.target == *target {
            return Ok(true);
        }
        let reach = self.reachable(entry.node);
        Ok(reach.iter().any(|n| self.store.keys[n.index()].target == *target))
    }

    /// True if computing `state` needs `other`'s node first. A derivative or
    /// constraint also depends on the other states of its own target.
    pub fn depends_on_state(&self, state: StateId, other: StateId) -> CompileResult<bool> {
        let entry = self.entry(state)?;
        let o = self.entry(other)?;
        if state != other && entry.role.allows_self_reference() && entry.target == o.target {
            return Ok(true);
        }
        Ok(self.reachable(entry.node).contains(&o.node))
    }
}

//! storage.rs
//! Arena layout for the dependency graph: columnar node data plus linked-list
//! adjacency in both directions, so edges can be appended as references resolve.

use super::edge::EdgeKind;
use crate::store::types::{ClusterId, DataKey, StateId};
use smallvec::SmallVec;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    // Node columns
    pub keys: Vec<DataKey>,
    pub states: Vec<SmallVec<[StateId; 1]>>,
    pub clusters: Vec<Option<ClusterId>>,

    // Dependencies (forward edges)
    pub first_dep: Vec<u32>,
    pub dep_targets: Vec<NodeId>,
    pub dep_kinds: Vec<EdgeKind>,
    pub next_dep: Vec<u32>,

    // Dependents (back edges)
    pub first_user: Vec<u32>,
    pub user_targets: Vec<NodeId>,
    pub next_user: Vec<u32>,

    edge_set: HashSet<(NodeId, NodeId)>,
}

impl GraphStore {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.keys.len() }
    pub fn edge_count(&self) -> usize { self.dep_targets.len() }

    pub fn push_node(&mut self, key: DataKey, state: StateId) -> NodeId {
        let id = NodeId::new(self.keys.len());
        self.keys.push(key);
        self.states.push(smallvec::smallvec![state]);
        self.clusters.push(None);
        self.first_dep.push(NIL);
        self.first_user.push(NIL);
        id
    }

    /// Records that `from` cannot precede `to`. Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) -> bool {
        if !self.edge_set.insert((from, to)) {
            return false;
        }

        // 1. Forward list
        let head = self.first_dep[from.index()];
        self.first_dep[from.index()] = self.dep_targets.len() as u32;
        self.dep_targets.push(to);
        self.dep_kinds.push(kind);
        self.next_dep.push(head);

        // 2. Back list
        let head = self.first_user[to.index()];
        self.first_user[to.index()] = self.user_targets.len() as u32;
        self.user_targets.push(from);
        self.next_user.push(head);

        true
    }

    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.edge_set.contains(&(from, to))
    }

    /// Nodes `id` depends on, with the edge kind.
    pub fn dependencies(&self, id: NodeId) -> impl Iterator<Item = (NodeId, EdgeKind)> + '_ {
        let mut edge = self.first_dep[id.index()];
        std::iter::from_fn(move || {
            if edge == NIL {
                return None;
            }
            let e = edge as usize;
            edge = self.next_dep[e];
            Some((self.dep_targets[e], self.dep_kinds[e]))
        })
    }

    /// Nodes that depend on `id`.
    pub fn dependents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut edge = self.first_user[id.index()];
        std::iter::from_fn(move || {
            if edge == NIL {
                return None;
            }
            let e = edge as usize;
            edge = self.next_user[e];
            Some(self.user_targets[e])
        })
    }
}

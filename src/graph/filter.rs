//! filter.rs
//! Composable set queries over one dependency graph.
//!
//! A filter either returns new filters from each query, or (after `filter()`)
//! narrows itself in place so queries can be chained.

use super::dag::DependencyGraph;
use crate::error::CompileResult;
use crate::store::types::StateId;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct DependencyFilter<'g> {
    graph: &'g DependencyGraph,
    states: BTreeSet<StateId>,
    not: Option<BTreeSet<StateId>>,
    in_place: bool,
}

impl<'g> DependencyFilter<'g> {
    pub fn new(graph: &'g DependencyGraph, states: impl IntoIterator<Item = StateId>) -> Self {
        Self { graph, states: states.into_iter().collect(), not: None, in_place: false }
    }

    /// Every state in the graph.
    pub fn all(graph: &'g DependencyGraph) -> Self {
        Self::new(graph, graph.states())
    }

    pub fn len(&self) -> usize { self.states.len() }
    pub fn is_empty(&self) -> bool { self.states.is_empty() }
    pub fn contains(&self, state: StateId) -> bool { self.states.contains(&state) }
    pub fn iter(&self) -> impl Iterator<Item = StateId> + '_ { self.states.iter().copied() }
    pub fn to_vec(&self) -> Vec<StateId> { self.iter().collect() }
    pub fn is_filtering(&self) -> bool { self.in_place }

    /// Subsequent queries narrow this filter in place.
    pub fn filter(&mut self) -> &mut Self {
        self.in_place = true;
        self
    }

    /// Subsequent queries return new filters and leave this one untouched.
    pub fn unfilter(&mut self) -> &mut Self {
        self.in_place = false;
        self
    }

    /// States of this set that depend on at least one of `others`.
    pub fn depends_on(&mut self, others: &[StateId]) -> CompileResult<Self> {
        let graph = self.graph;
        self.partition(|s| {
            for &o in others {
                if graph.depends_on_state(s, o)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// States of this set that at least one of `others` depends on.
    pub fn dependency_of(&mut self, others: &[StateId]) -> CompileResult<Self> {
        let graph = self.graph;
        self.partition(|s| {
            for &o in others {
                if graph.depends_on_state(o, s)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// The complement remembered by the last query (empty if none).
    ///
    /// In filter mode the set itself is swapped with its complement.
    pub fn not(&mut self) -> Self {
        if self.in_place {
            let complement = self.not.take().unwrap_or_default();
            let current = std::mem::replace(&mut self.states, complement);
            self.not = if current.is_empty() { None } else { Some(current) };
            return self.clone();
        }
        Self {
            graph: self.graph,
            states: self.not.clone().unwrap_or_default(),
            not: None,
            in_place: false,
        }
    }

    fn partition<F>(&mut self, mut keep: F) -> CompileResult<Self>
    where
        F: FnMut(StateId) -> CompileResult<bool>,
    {
        let mut kept = BTreeSet::new();
        let mut rest = BTreeSet::new();
        for &s in &self.states {
            if keep(s)? {
                kept.insert(s);
            } else {
                rest.insert(s);
            }
        }
        let not = if rest.is_empty() { None } else { Some(rest) };

        if self.in_place {
            self.states = kept;
            self.not = not;
            Ok(self.clone())
        } else {
            // Both the queried filter and the result remember the complement.
            self.not = not.clone();
            Ok(Self { graph: self.graph, states: kept, not, in_place: false })
        }
    }
}

//! select.rs
//! Mines open clusters and picks a disjoint subset by a greedy multi-start search.

use super::group::{Cluster, OpenCluster};
use crate::config::CompilerOptions;
use crate::error::CompileResult;
use crate::signature::{shape_key, Precomputed, Signature, SignatureTable};
use crate::store::types::{ClusterId, StateId};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MiningReport {
    /// Closed clusters before any filtering.
    pub candidates: usize,
    /// Dropped for having fewer members than the configured minimum.
    pub discarded_small: usize,
    /// Dropped because a cheaper selection covered their members.
    pub dropped_conflicts: usize,
    pub selected: usize,
    pub selection_cost: usize,
}

/// The surviving disjoint clusters.
#[derive(Debug, Clone, Default)]
pub struct ClusterSet {
    pub clusters: Vec<Cluster>,
    owner: HashMap<StateId, ClusterId>,
    pub report: MiningReport,
}

impl ClusterSet {
    pub fn empty() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.clusters.len() }
    pub fn is_empty(&self) -> bool { self.clusters.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, Cluster> { self.clusters.iter() }

    pub fn get(&self, id: ClusterId) -> Option<&Cluster> { self.clusters.get(id.index()) }

    pub fn cluster_of(&self, state: StateId) -> Option<ClusterId> {
        self.owner.get(&state).copied()
    }

    /// Member keys of every cluster, for comparing selections independent of ids.
    pub fn member_sets(&self) -> Vec<Vec<StateId>> {
        let mut sets: Vec<Vec<StateId>> = self.clusters.iter().map(|c| c.states().collect()).collect();
        sets.sort();
        sets
    }

    fn from_selected(mut clusters: Vec<Cluster>, report: MiningReport) -> Self {
        clusters.sort_by_key(|c| c.members.first().map(|m| m.state));
        let mut owner = HashMap::new();
        for (i, cluster) in clusters.iter_mut().enumerate() {
            cluster.renumber(ClusterId::new(i));
            for state in cluster.states() {
                owner.insert(state, cluster.id);
            }
        }
        Self { clusters, owner, report }
    }
}

/// Groups every state's formula by signature and selects disjoint clusters.
///
/// Each entry contributes its expanded expression and, when folding changed it,
/// the folded expression as an independent candidate.
pub fn mine(
    entries: &[(StateId, Precomputed)],
    table: &mut SignatureTable,
    options: &CompilerOptions,
) -> CompileResult<ClusterSet> {
    if options.disable_clustering {
        debug!(states = entries.len(), "clustering disabled");
        return Ok(ClusterSet::empty());
    }

    // 1. Open clusters keyed by prototype signature
    let mut open: IndexMap<Signature, OpenCluster> = IndexMap::new();
    let mut inline_len: HashMap<StateId, usize> = HashMap::new();
    for (state, pre) in entries {
        inline_len.insert(*state, pre.expanded.len());
        for candidate in pre.candidates() {
            if candidate.is_empty() {
                continue;
            }
            let sig = table.signature(candidate)?;
            open.entry(sig.clone())
                .or_insert_with(|| OpenCluster::new(sig))
                .push(*state, candidate.clone());
        }
    }

    // 2. Close and drop clusters below the minimum size
    let closed: Vec<Cluster> = open
        .into_values()
        .enumerate()
        .map(|(i, c)| c.close(ClusterId::new(i)))
        .collect();
    let mut report = MiningReport { candidates: closed.len(), ..Default::default() };

    let min = options.min_cluster_size;
    let (mut viable, small): (Vec<Cluster>, Vec<Cluster>) = closed.into_iter().partition(|c| c.len() >= min);
    for c in &small {
        debug!(shape = %shape_key(&c.prototype), members = c.len(), min, "discarded undersized cluster");
    }
    report.discarded_small = small.len();

    // 3. Deterministic candidate order
    viable.sort_by_cached_key(|c| {
        (std::cmp::Reverse(c.len()), c.cost(), shape_key(&c.prototype), c.states().collect::<Vec<_>>())
    });

    // 4. Multi-start first fit
    let chosen = best_selection(&viable, &inline_len);
    report.selection_cost = selection_cost(&viable, &chosen, &inline_len);

    let chosen_set: HashSet<usize> = chosen.iter().copied().collect();
    let mut selected = Vec::with_capacity(chosen.len());
    for (i, cluster) in viable.into_iter().enumerate() {
        if chosen_set.contains(&i) {
            selected.push(cluster);
        } else {
            report.dropped_conflicts += 1;
            debug!(
                shape = %shape_key(&cluster.prototype),
                members = cluster.len(),
                cost = cluster.cost(),
                "dropped conflicting cluster"
            );
        }
    }
    report.selected = selected.len();

    debug!(
        candidates = report.candidates,
        selected = report.selected,
        cost = report.selection_cost,
        "cluster mining finished"
    );
    Ok(ClusterSet::from_selected(selected, report))
}

/// Tries every candidate as the seed of a first-fit pass over the whole sorted list
/// and keeps the cheapest selection. Ties keep the earliest seed.
fn best_selection(candidates: &[Cluster], inline_len: &HashMap<StateId, usize>) -> Vec<usize> {
    let mut best: Option<(usize, Vec<usize>)> = None;

    for start in 0..candidates.len() {
        let mut chosen = vec![start];
        for j in 0..candidates.len() {
            if j == start {
                continue;
            }
            if chosen.iter().all(|&k| !candidates[k].shares_member(&candidates[j])) {
                chosen.push(j);
            }
        }

        let cost = selection_cost(candidates, &chosen, inline_len);
        if best.as_ref().map_or(true, |(c, _)| cost < *c) {
            best = Some((cost, chosen));
        }
    }

    let mut chosen = best.map(|(_, c)| c).unwrap_or_default();
    chosen.sort_unstable();
    chosen
}

/// Routine cost of every chosen cluster plus inline cost of every candidate state left out.
fn selection_cost(candidates: &[Cluster], chosen: &[usize], inline_len: &HashMap<StateId, usize>) -> usize {
    let covered: HashSet<StateId> = chosen.iter().flat_map(|&i| candidates[i].states()).collect();
    let universe: HashSet<StateId> = candidates.iter().flat_map(|c| c.states()).collect();

    let routines: usize = chosen.iter().map(|&i| candidates[i].cost()).sum();
    let inline: usize = universe
        .difference(&covered)
        .map(|s| inline_len.get(s).copied().unwrap_or(0))
        .sum();
    routines + inline
}

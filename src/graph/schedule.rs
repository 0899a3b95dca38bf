//! schedule.rs
//! Cluster-aware Kahn's algorithm over a subset of the dependency graph.

use super::dag::DependencyGraph;
use super::storage::NodeId;
use crate::error::{CompileError, CompileResult};
use crate::store::types::{ClusterId, Phase, StateId};
use indexmap::{IndexMap, IndexSet};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// A batch of mutually independent states, all in one cluster or all unclustered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyGroup {
    pub cluster: Option<ClusterId>,
    pub states: Vec<StateId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseSchedule {
    pub phase: Phase,
    pub groups: Vec<DependencyGroup>,
}

impl PhaseSchedule {
    /// States in emission order.
    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.groups.iter().flat_map(|g| g.states.iter().copied())
    }
}

/// The subset projected onto units: the states of one node that share a cluster
/// membership. Edges run only between units of subset nodes.
struct Collapsed {
    nodes: Vec<NodeId>,
    clusters: Vec<Option<ClusterId>>,
    states: Vec<SmallVec<[StateId; 1]>>,
    deps: Vec<Vec<usize>>,
    users: Vec<Vec<usize>>,
}

const UNCLUSTERED: usize = 0;

impl DependencyGraph {
    fn collapse(&self, subset: &[StateId]) -> CompileResult<Collapsed> {
        // A node holding a cluster member and an unrelated state splits into two units.
        let mut local: IndexMap<(NodeId, Option<ClusterId>), SmallVec<[StateId; 1]>> = IndexMap::new();
        let mut units_of: HashMap<NodeId, SmallVec<[usize; 2]>> = HashMap::new();
        for &state in subset {
            let node = self.node_of(state)?;
            let entry = local.entry((node, self.state_cluster(state)));
            let unit = entry.index();
            let states = entry.or_default();
            if !states.contains(&state) {
                states.push(state);
            }
            let units = units_of.entry(node).or_default();
            if !units.contains(&unit) {
                units.push(unit);
            }
        }

        // Nearest subset dependencies, skipping over nodes outside the subset.
        let mut deps = Vec::with_capacity(local.len());
        for &(node, _) in local.keys() {
            let mut found = BTreeSet::new();
            let mut seen = HashSet::new();
            let mut stack: Vec<NodeId> = self.dependencies(node).map(|(n, _)| n).collect();
            while let Some(n) = stack.pop() {
                if !seen.insert(n) {
                    continue;
                }
                match units_of.get(&n) {
                    Some(units) => found.extend(units.iter().copied()),
                    None => stack.extend(self.dependencies(n).map(|(d, _)| d)),
                }
            }
            deps.push(found.into_iter().collect::<Vec<usize>>());
        }

        let mut users = vec![Vec::new(); deps.len()];
        for (i, ds) in deps.iter().enumerate() {
            for &d in ds {
                users[d].push(i);
            }
        }

        let (keys, states): (Vec<(NodeId, Option<ClusterId>)>, Vec<SmallVec<[StateId; 1]>>) =
            local.into_iter().unzip();
        let (nodes, clusters): (Vec<NodeId>, Vec<Option<ClusterId>>) = keys.into_iter().unzip();
        Ok(Collapsed { nodes, clusters, states, deps, users })
    }

    /// Orders `subset` so every state follows its in-subset dependencies, batching
    /// members of one cluster contiguously.
    pub fn schedule(&self, subset: &[StateId]) -> CompileResult<Vec<DependencyGroup>> {
        let c = self.collapse(subset)?;
        let count = c.nodes.len();

        // 1. Cluster ranks by first sighting; unclustered states share rank 0
        let mut ranks: IndexMap<ClusterId, usize> = IndexMap::new();
        let rank: Vec<usize> = c
            .clusters
            .iter()
            .map(|cluster| match cluster {
                Some(id) => {
                    let next = ranks.len() + 1;
                    *ranks.entry(*id).or_insert(next)
                }
                None => UNCLUSTERED,
            })
            .collect();
        let mut members = vec![Vec::new(); ranks.len() + 1];
        for (i, &r) in rank.iter().enumerate() {
            members[r].push(i);
        }

        // 2. Seed the ready queues
        let mut pending: Vec<usize> = c.deps.iter().map(|d| d.len()).collect();
        let mut ready: BTreeMap<usize, VecDeque<usize>> = BTreeMap::new();
        for i in 0..count {
            if pending[i] == 0 {
                ready.entry(rank[i]).or_default().push_back(i);
            }
        }

        // 3. Drain
        let mut groups: Vec<DependencyGroup> = Vec::new();
        let mut group_of: Vec<Option<usize>> = vec![None; count];
        let mut current: Option<usize> = None;
        let mut emitted = 0;

        loop {
            let frontier = Frontier { collapsed: &c, rank: &rank, members: &members, ready: &ready, group_of: &group_of };
            let Some(r) = frontier.pick_rank(current) else { break };
            let Some(i) = ready.get_mut(&r).and_then(|q| q.pop_front()) else { break };
            if ready.get(&r).is_some_and(|q| q.is_empty()) {
                ready.remove(&r);
            }

            let last = groups.len().checked_sub(1);
            let joins = match last {
                Some(g) => current == Some(r) && !c.deps[i].iter().any(|&d| group_of[d] == Some(g)),
                None => false,
            };
            if !joins {
                groups.push(DependencyGroup { cluster: c.clusters[i], states: Vec::new() });
            }
            let g = groups.len() - 1;
            groups[g].states.extend(c.states[i].iter().copied());
            group_of[i] = Some(g);
            current = Some(r);
            emitted += 1;

            for &u in &c.users[i] {
                pending[u] -= 1;
                if pending[u] == 0 {
                    ready.entry(rank[u]).or_default().push_back(u);
                }
            }
        }

        if emitted < count {
            return Err(self.cycle_error(&c, &group_of));
        }

        debug!(states = subset.len(), groups = groups.len(), clusters = ranks.len(), "scheduled subset");
        Ok(groups)
    }

    pub fn schedule_phase(&self, phase: Phase, subset: &[StateId]) -> CompileResult<PhaseSchedule> {
        let groups = self.schedule(subset)?;
        Ok(PhaseSchedule { phase, groups })
    }

    fn cycle_error(&self, c: &Collapsed, group_of: &[Option<usize>]) -> CompileError {
        let leftover: Vec<usize> = (0..c.nodes.len()).filter(|&i| group_of[i].is_none()).collect();

        let mut g: DiGraph<usize, ()> = DiGraph::new();
        let index: HashMap<usize, _> = leftover.iter().map(|&i| (i, g.add_node(i))).collect();
        for &i in &leftover {
            for d in &c.deps[i] {
                if let Some(&to) = index.get(d) {
                    g.add_edge(index[&i], to, ());
                }
            }
        }

        let mut cycle: Vec<String> = tarjan_scc(&g)
            .into_iter()
            .find(|scc| scc.len() > 1 || g.contains_edge(scc[0], scc[0]))
            .unwrap_or_default()
            .into_iter()
            .map(|n| self.node_name(c.nodes[g[n]]).to_string())
            .collect();
        cycle.sort();
        cycle.dedup();

        // Units of one node share its name.
        let remaining: IndexSet<String> = leftover.iter().map(|&i| self.node_name(c.nodes[i]).to_string()).collect();
        let remaining = remaining.into_iter().collect();
        CompileError::CycleDetected { remaining, cycle }
    }
}

/// What the next-rank choice looks at after each emitted unit.
struct Frontier<'a> {
    collapsed: &'a Collapsed,
    rank: &'a [usize],
    members: &'a [Vec<usize>],
    ready: &'a BTreeMap<usize, VecDeque<usize>>,
    group_of: &'a [Option<usize>],
}

impl Frontier<'_> {
    fn has_ready(&self, r: usize) -> bool {
        self.ready.get(&r).is_some_and(|q| !q.is_empty())
    }

    /// True if every unemitted member of cluster `r` waits only on other members of `r`,
    /// so once started the cluster can finish without interruption.
    fn self_contained(&self, r: usize) -> bool {
        let mut seen = HashSet::new();
        let mut stack: Vec<usize> = self.members[r].iter().copied().filter(|&i| self.group_of[i].is_none()).collect();
        while let Some(i) = stack.pop() {
            if !seen.insert(i) {
                continue;
            }
            if self.rank[i] != r {
                return false;
            }
            stack.extend(self.collapsed.deps[i].iter().copied().filter(|&d| self.group_of[d].is_none()));
        }
        true
    }

    /// Which rank to take the next ready state from:
    /// the current cluster, then unclustered states, then a cluster that can run to
    /// completion, then any ready cluster.
    fn pick_rank(&self, current: Option<usize>) -> Option<usize> {
        if let Some(r) = current.filter(|&r| r != UNCLUSTERED && self.has_ready(r)) {
            return Some(r);
        }
        if self.has_ready(UNCLUSTERED) {
            return Some(UNCLUSTERED);
        }
        let clusters: Vec<usize> = self.ready.iter().filter(|(_, q)| !q.is_empty()).map(|(&r, _)| r).collect();
        clusters
            .iter()
            .copied()
            .find(|&r| self.self_contained(r))
            .or_else(|| clusters.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::store::instruction::{Expression, Instruction, MathOp};
    use crate::store::model::VariableFlags;
    use crate::store::types::{Role, Target, VarId};
    use proptest::prelude::*;
    use Instruction::*;

    /// Direct state `name = k + sum(deps)`.
    fn direct(session: &mut Session, name: &str, k: f64, deps: &[VarId]) -> (VarId, StateId) {
        let v = session.model.add_variable(name, VariableFlags::OUTPUT, None);
        let mut expr = Expression::number(k);
        for &d in deps {
            expr.push(Variable(d));
            expr.push(Operator(MathOp::Add));
        }
        let s = session.add_state(Target::Variable(v), Role::Direct, expr, name).unwrap();
        (v, s)
    }

    fn position(groups: &[DependencyGroup]) -> HashMap<StateId, usize> {
        groups.iter().flat_map(|g| g.states.iter().copied()).enumerate().map(|(i, s)| (s, i)).collect()
    }

    #[test]
    fn test_chain_order() {
        let mut session = Session::default();
        // Shape: c -> b -> a
        let (va, sa) = direct(&mut session, "a", 1.0, &[]);
        let (vb, sb) = direct(&mut session, "b", 1.0, &[va]);
        let (_, sc) = direct(&mut session, "c", 1.0, &[vb]);

        let graph = session.build_graph(None).unwrap();
        let groups = graph.schedule(&[sc, sb, sa]).unwrap();
        assert_eq!(
            groups,
            vec![
                DependencyGroup { cluster: None, states: vec![sa] },
                DependencyGroup { cluster: None, states: vec![sb] },
                DependencyGroup { cluster: None, states: vec![sc] },
            ]
        );
    }

    #[test]
    fn test_independent_states_share_a_group() {
        let mut session = Session::default();
        let (_, s1) = direct(&mut session, "a", 1.0, &[]);
        let (_, s2) = direct(&mut session, "b", 2.0, &[]);
        let graph = session.build_graph(None).unwrap();

        let groups = graph.schedule(&[s1, s2]).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].states, vec![s1, s2]);
    }

    #[test]
    fn test_collapse_skips_states_outside_subset() {
        let mut session = Session::default();
        let (va, sa) = direct(&mut session, "a", 1.0, &[]);
        let (vb, _sb) = direct(&mut session, "b", 1.0, &[va]);
        let (_, sc) = direct(&mut session, "c", 1.0, &[vb]);

        let graph = session.build_graph(None).unwrap();
        let schedule = graph.schedule_phase(Phase::Post, &[sc, sa]).unwrap();
        assert_eq!(schedule.phase, Phase::Post);
        assert_eq!(schedule.states().collect::<Vec<_>>(), vec![sa, sc]);
        // c transitively needs a, so they cannot share a group.
        assert_eq!(schedule.groups.len(), 2);
    }

    #[test]
    fn test_clustered_members_stay_together() {
        let mut session = Session::default();
        let (vl, sl) = direct(&mut session, "l", 3.0, &[]);
        let mut ys = Vec::new();
        let mut yvars = Vec::new();
        for i in 0..3 {
            let x = session.model.add_variable(&format!("x{}", i), VariableFlags::INTEGRATED, None);
            session.add_state(Target::Variable(x), Role::Integrated, Expression::new(), &format!("x{}", i)).unwrap();
            let y = session.model.add_variable(&format!("y{}", i), VariableFlags::OUTPUT, None);
            let expr = Expression::from(vec![Variable(vl), Variable(x), Operator(MathOp::Multiply)]);
            ys.push(session.add_state(Target::Variable(y), Role::Direct, expr, &format!("y{}", i)).unwrap());
            yvars.push(y);
        }
        let (_, st) = direct(&mut session, "t", 0.0, &[yvars[0], yvars[1]]);

        let clusters = session.mine_clusters().unwrap();
        assert_eq!(clusters.len(), 1);
        let graph = session.build_graph(Some(&clusters)).unwrap();

        let groups = graph.schedule(&[st, ys[2], ys[0], sl, ys[1]]).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0], DependencyGroup { cluster: None, states: vec![sl] });
        assert_eq!(groups[1].cluster, Some(ClusterId(0)));
        let mut members = groups[1].states.clone();
        members.sort();
        assert_eq!(members, ys);
        assert_eq!(groups[2], DependencyGroup { cluster: None, states: vec![st] });
    }

    #[test]
    fn test_induced_cycle_is_reported() {
        let mut session = Session::default();
        let a = session.model.add_variable("A", VariableFlags::OUTPUT, None);
        let b = session.model.add_variable("B", VariableFlags::OUTPUT, None);
        let (_, sk) = direct(&mut session, "k", 1.0, &[]);
        let sa = session
            .add_state(Target::Variable(a), Role::Direct, Expression::from(vec![Variable(b), Number(1.0), Operator(MathOp::Add)]), "A")
            .unwrap();
        let sb = session
            .add_state(Target::Variable(b), Role::Direct, Expression::from(vec![Variable(a), Number(1.0), Operator(MathOp::Add)]), "B")
            .unwrap();

        let graph = session.build_graph(None).unwrap();
        match graph.schedule(&[sk, sa, sb]) {
            Err(CompileError::CycleDetected { remaining, cycle }) => {
                assert_eq!(remaining, vec!["A".to_string(), "B".to_string()]);
                assert_eq!(cycle, vec!["A".to_string(), "B".to_string()]);
            }
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_state() {
        let graph = DependencyGraph::new();
        assert!(matches!(graph.schedule(&[StateId(0)]), Err(CompileError::UnknownState(_))));
    }

    #[test]
    fn test_groups_serialize() {
        let schedule = PhaseSchedule {
            phase: Phase::Diff,
            groups: vec![DependencyGroup { cluster: Some(ClusterId(2)), states: vec![StateId(1), StateId(4)] }],
        };
        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json["phase"], "Diff");
        assert_eq!(json["groups"][0]["cluster"], 2);
        assert_eq!(json["groups"][0]["states"][1], 4);
    }

    #[test]
    fn test_cluster_waiting_on_another_cluster_starts_later() {
        let mut session = Session::default();
        // Shape: b1 -> {a2, b2}; clusters A = {a1, a2}, B = {b1, b2}
        let (_, a1) = direct(&mut session, "a1", 1.0, &[]);
        let (vb1, b1) = direct(&mut session, "b1", 1.0, &[]);
        let (_, a2) = direct(&mut session, "a2", 1.0, &[vb1]);
        let (_, b2) = direct(&mut session, "b2", 1.0, &[vb1]);

        let mut graph = session.build_graph(None).unwrap();
        for (state, c) in [(a1, 0), (a2, 0), (b1, 1), (b2, 1)] {
            graph.set_cluster(state, ClusterId(c)).unwrap();
        }

        let groups = graph.schedule(&[a1, a2, b1, b2]).unwrap();
        let order: Vec<StateId> = groups.iter().flat_map(|g| g.states.iter().copied()).collect();
        assert_eq!(order, vec![b1, b2, a1, a2]);
        assert_eq!(groups.last(), Some(&DependencyGroup { cluster: Some(ClusterId(0)), states: vec![a1, a2] }));
    }

    #[test]
    fn test_non_member_on_clustered_node_stays_out_of_the_group() {
        use crate::store::instruction::MathFn;
        use crate::store::types::OperatorId;

        let mut session = Session::default();
        let x = session.model.add_variable("x", VariableFlags::INTEGRATED, None);
        session.add_state(Target::Variable(x), Role::Integrated, Expression::new(), "x").unwrap();
        let mut delays = Vec::new();
        for i in 0..3 {
            let k = session.model.add_variable(&format!("k{}", i), VariableFlags::INPUT, None);
            let expr = Expression::from(vec![Variable(x), Variable(k), Operator(MathOp::Add)]);
            delays.push(session.add_state(Target::Operator(OperatorId(i)), Role::Delayed, expr, &format!("d{}", i)).unwrap());
        }
        // Shares op0's key with d0 but not its shape.
        let stray = session
            .add_state(
                Target::Operator(OperatorId(0)),
                Role::Delayed,
                Expression::from(vec![Variable(x), Function(MathFn::Sin)]),
                "stray",
            )
            .unwrap();

        let clusters = session.mine_clusters().unwrap();
        assert_eq!(clusters.member_sets(), vec![delays.clone()]);
        assert_eq!(clusters.cluster_of(stray), None);
        let graph = session.build_graph(Some(&clusters)).unwrap();
        assert_eq!(graph.node_of(stray).unwrap(), graph.node_of(delays[0]).unwrap());

        let groups = graph.schedule(&[delays[0], stray, delays[1], delays[2]]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], DependencyGroup { cluster: None, states: vec![stray] });
        assert_eq!(groups[1].cluster, Some(ClusterId(0)));
        assert_eq!(groups[1].states, delays);
    }

    proptest! {
        #[test]
        fn prop_dependencies_precede(
            layout in prop::collection::vec((prop::collection::vec(any::<u8>(), 0..3), prop::option::of(0u32..3)), 1..16)
        ) {
            let mut session = Session::default();
            let mut vars = Vec::new();
            let mut ids = Vec::new();
            let mut deps_of = Vec::new();
            for (i, (picks, _)) in layout.iter().enumerate() {
                let deps: Vec<usize> = if i == 0 { vec![] } else { picks.iter().map(|p| *p as usize % i).collect() };
                let dep_vars: Vec<VarId> = deps.iter().map(|&d| vars[d]).collect();
                let (v, s) = direct(&mut session, &format!("s{}", i), i as f64, &dep_vars);
                vars.push(v);
                ids.push(s);
                deps_of.push(deps);
            }

            let mut graph = session.build_graph(None).unwrap();
            for (i, (_, cluster)) in layout.iter().enumerate() {
                if let Some(c) = cluster {
                    graph.set_cluster(ids[i], ClusterId(*c)).unwrap();
                }
            }

            let mut subset = ids.clone();
            subset.reverse();
            let groups = graph.schedule(&subset).unwrap();
            let pos = position(&groups);
            prop_assert_eq!(pos.len(), ids.len());
            for (i, deps) in deps_of.iter().enumerate() {
                for &d in deps {
                    prop_assert!(pos[&ids[d]] < pos[&ids[i]]);
                }
            }
            // Members of one group never depend on each other.
            for group in &groups {
                for &a in &group.states {
                    for &b in &group.states {
                        prop_assert!(!graph.depends_on_state(a, b).unwrap());
                    }
                }
            }
        }

        #[test]
        fn prop_cluster_contiguity(
            leaves in 1usize..5,
            members in prop::collection::vec((prop::collection::vec(any::<u8>(), 0..3), 0u32..3), 1..10),
            tops in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..3), 0..5),
        ) {
            let mut session = Session::default();
            let mut all = Vec::new();

            let leaf_vars: Vec<VarId> = (0..leaves)
                .map(|i| {
                    let (v, s) = direct(&mut session, &format!("leaf{}", i), i as f64, &[]);
                    all.push(s);
                    v
                })
                .collect();

            // A member reads leaves, earlier members of its own cluster and members of
            // lower clusters, so emitting clusters in order is always contiguous.
            let mut member_vars = Vec::new();
            let mut member_ids = Vec::new();
            for (i, (picks, c)) in members.iter().enumerate() {
                let mut pool = leaf_vars.clone();
                pool.extend((0..i).filter(|&j| members[j].1 <= *c).map(|j| member_vars[j]));
                let deps: Vec<VarId> = picks.iter().map(|p| pool[*p as usize % pool.len()]).collect();
                let (v, s) = direct(&mut session, &format!("m{}", i), 0.0, &deps);
                member_vars.push(v);
                member_ids.push(s);
                all.push(s);
            }

            for (i, picks) in tops.iter().enumerate() {
                let deps: Vec<VarId> = picks.iter().map(|p| member_vars[*p as usize % member_vars.len()]).collect();
                let (_, s) = direct(&mut session, &format!("top{}", i), 0.0, &deps);
                all.push(s);
            }

            let mut graph = session.build_graph(None).unwrap();
            for (i, (_, c)) in members.iter().enumerate() {
                graph.set_cluster(member_ids[i], ClusterId(*c)).unwrap();
            }

            all.reverse();
            let groups = graph.schedule(&all).unwrap();
            let order: Vec<StateId> = groups.iter().flat_map(|g| g.states.iter().copied()).collect();

            for c in 0..3u32 {
                let at: Vec<usize> = order
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| graph.state_cluster(**s) == Some(ClusterId(c)))
                    .map(|(i, _)| i)
                    .collect();
                if let (Some(first), Some(last)) = (at.first(), at.last()) {
                    prop_assert_eq!(last - first + 1, at.len());
                }
            }
        }
    }
}

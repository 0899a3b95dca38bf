//! group.rs
//! Open clusters collect structurally equal formulas; closing one turns it into a
//! parameterized routine plus a per-member index table.

use crate::signature::{Signature, PLACEHOLDER};
use crate::store::instruction::{Expression, Instruction};
use crate::store::types::{ClusterId, StateId};
use serde::Serialize;
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub state: StateId,
    pub expression: Expression,
}

/// A cluster still accepting members.
#[derive(Debug, Clone)]
pub struct OpenCluster {
    pub signature: Signature,
    pub members: Vec<Member>,
}

impl OpenCluster {
    pub fn new(signature: Signature) -> Self {
        Self { signature, members: Vec::new() }
    }

    pub fn push(&mut self, state: StateId, expression: Expression) {
        self.members.push(Member { state, expression });
    }

    /// Freezes the cluster.
    ///
    /// Placeholder positions whose operand is identical for every member are baked
    /// into the prototype; the others become parameters. Parameters whose operand
    /// columns coincide share one argument slot.
    pub fn close(mut self, id: ClusterId) -> Cluster {
        self.members.sort_by_key(|m| m.state);

        let mut prototype = self.members.first().map(|m| m.expression.clone()).unwrap_or_default();
        let mut parameters = Vec::new();
        let mut arguments: Vec<SmallVec<[usize; 2]>> = Vec::new();

        for pos in self.signature.placeholders() {
            let Some(head) = self.members.first() else { break };
            let first = &head.expression.instructions[pos];
            let shared = self.members.iter().all(|m| m.expression.instructions[pos].same_operand(first));
            if shared {
                continue;
            }
            parameters.push(pos);

            let slot = arguments.iter().position(|positions| {
                let other = positions[0];
                self.members.iter().all(|m| {
                    m.expression.instructions[pos].same_operand(&m.expression.instructions[other])
                })
            });
            let slot = match slot {
                Some(s) => {
                    arguments[s].push(pos);
                    s
                }
                None => {
                    arguments.push(smallvec::smallvec![pos]);
                    arguments.len() - 1
                }
            };
            prototype.instructions[pos] = Instruction::Argument(slot as u16);
        }

        Cluster {
            id,
            signature: self.signature,
            prototype,
            parameters,
            arguments,
            members: self.members,
        }
    }
}

/// A closed, immutable cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub signature: Signature,
    /// First member's expression with every parameter replaced by `Argument(slot)`.
    pub prototype: Expression,
    /// Instruction positions that vary per member.
    pub parameters: Vec<usize>,
    /// For each argument slot, the parameter positions it feeds.
    pub arguments: Vec<SmallVec<[usize; 2]>>,
    /// Ordered by state id.
    pub members: Vec<Member>,
}

impl Cluster {
    pub fn len(&self) -> usize { self.members.len() }
    pub fn is_empty(&self) -> bool { self.members.is_empty() }
    pub fn arity(&self) -> usize { self.arguments.len() }

    pub fn contains(&self, state: StateId) -> bool {
        self.members.binary_search_by_key(&state, |m| m.state).is_ok()
    }

    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.members.iter().map(|m| m.state)
    }

    /// Estimated size of the rendered routine plus its index table.
    pub fn cost(&self) -> usize {
        let m = self.len();
        2 * m + self.prototype.len() + m * self.arity()
    }

    pub fn shares_member(&self, other: &Cluster) -> bool {
        // Both member lists are sorted.
        let (mut i, mut j) = (0, 0);
        while i < self.members.len() && j < other.members.len() {
            match self.members[i].state.cmp(&other.members[j].state) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }

    /// Concrete argument operands of one member.
    pub fn row(&self, member: &Member) -> Vec<Instruction> {
        self.arguments
            .iter()
            .map(|positions| member.expression.instructions[positions[0]].clone())
            .collect()
    }

    /// One row per member, one column per argument slot.
    pub fn index_table(&self) -> Vec<Vec<Instruction>> {
        self.members.iter().map(|m| self.row(m)).collect()
    }

    /// The replacement expression for `state`: its arguments followed by the routine call.
    pub fn call_site(&self, state: StateId) -> Option<Expression> {
        let idx = self.members.binary_search_by_key(&state, |m| m.state).ok()?;
        let mut expr = Expression::from(self.row(&self.members[idx]));
        expr.push(Instruction::Routine { cluster: self.id, arity: self.arity() as u16 });
        Some(expr)
    }

    pub(crate) fn renumber(&mut self, id: ClusterId) {
        self.id = id;
    }

    /// Number of placeholder positions baked as shared constants.
    pub fn baked(&self) -> usize {
        self.signature.codes().iter().filter(|c| **c == PLACEHOLDER).count() - self.parameters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureTable;
    use crate::store::instruction::MathOp;
    use crate::store::types::VarId;
    use Instruction::*;

    fn open_from(exprs: Vec<(u32, Vec<Instruction>)>) -> OpenCluster {
        let mut table = SignatureTable::new();
        let first = Expression::from(exprs[0].1.clone());
        let mut open = OpenCluster::new(table.signature(&first).unwrap());
        for (s, e) in exprs {
            open.push(StateId(s), Expression::from(e));
        }
        open
    }

    #[test]
    fn test_close_bakes_shared_operands() {
        // x_i' = 2 * x_i  for three states: the literal is baked, x_i is a parameter.
        let open = open_from(vec![
            (2, vec![Number(2.0), Variable(VarId(2)), Operator(MathOp::Multiply)]),
            (0, vec![Number(2.0), Variable(VarId(0)), Operator(MathOp::Multiply)]),
            (1, vec![Number(2.0), Variable(VarId(1)), Operator(MathOp::Multiply)]),
        ]);
        let cluster = open.close(ClusterId(0));

        assert_eq!(cluster.states().collect::<Vec<_>>(), vec![StateId(0), StateId(1), StateId(2)]);
        assert_eq!(cluster.parameters, vec![1]);
        assert_eq!(cluster.arity(), 1);
        assert_eq!(cluster.baked(), 1);
        assert_eq!(cluster.prototype.instructions, vec![Number(2.0), Argument(0), Operator(MathOp::Multiply)]);
        assert_eq!(cluster.cost(), 2 * 3 + 3 + 3);
    }

    #[test]
    fn test_close_merges_identical_columns() {
        // x_i * x_i: both positions vary but always together.
        let open = open_from(vec![
            (0, vec![Variable(VarId(0)), Variable(VarId(0)), Operator(MathOp::Multiply)]),
            (1, vec![Variable(VarId(1)), Variable(VarId(1)), Operator(MathOp::Multiply)]),
        ]);
        let cluster = open.close(ClusterId(0));

        assert_eq!(cluster.parameters, vec![0, 1]);
        assert_eq!(cluster.arity(), 1);
        assert_eq!(cluster.prototype.instructions[0], Argument(0));
        assert_eq!(cluster.prototype.instructions[1], Argument(0));
        assert_eq!(cluster.index_table(), vec![vec![Variable(VarId(0))], vec![Variable(VarId(1))]]);
    }

    #[test]
    fn test_call_site() {
        let open = open_from(vec![
            (4, vec![Variable(VarId(0)), Number(1.0), Operator(MathOp::Add)]),
            (7, vec![Variable(VarId(1)), Number(3.0), Operator(MathOp::Add)]),
        ]);
        let cluster = open.close(ClusterId(5));
        assert_eq!(cluster.arity(), 2);

        let call = cluster.call_site(StateId(7)).unwrap();
        assert_eq!(
            call.instructions,
            vec![Variable(VarId(1)), Number(3.0), Routine { cluster: ClusterId(5), arity: 2 }]
        );
        assert!(call.validate().is_ok());
        assert!(cluster.call_site(StateId(9)).is_none());
    }

    #[test]
    fn test_shares_member() {
        let a = open_from(vec![(0, vec![Number(1.0)]), (2, vec![Number(2.0)])]).close(ClusterId(0));
        let b = open_from(vec![(1, vec![Number(1.0)]), (2, vec![Number(3.0)])]).close(ClusterId(1));
        let c = open_from(vec![(1, vec![Number(1.0)]), (3, vec![Number(3.0)])]).close(ClusterId(2));
        assert!(a.shares_member(&b));
        assert!(!a.shares_member(&c));
    }
}

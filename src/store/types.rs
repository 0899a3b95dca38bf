use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! index_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(&self) -> usize { self.0 as usize }
            pub fn new(idx: usize) -> Self { Self(idx as u32) }
        }
    };
}

index_id!(
    /// Position of a state in the `StateRegistry`.
    StateId
);
index_id!(
    /// Position of a variable in the `Model`.
    VarId
);
index_id!(
    /// A custom operator instance (delay slot, lookup table, ...).
    OperatorId
);
index_id!(
    /// A random draw owned by the model.
    RandId
);
index_id!(ClusterId);

/// What a state computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Integrated,
    Direct,
    Derivative,
    Initialization,
    Delayed,
    EventNode,
    EventSet,
    EventAction,
    Constraint,
    Auxiliary,
    Rand,
}

impl Role {
    /// Only these roles may read their own target.
    pub fn allows_self_reference(&self) -> bool {
        matches!(self, Role::Derivative | Role::Constraint)
    }

    pub fn view(&self) -> View {
        match self {
            Role::Derivative => View::Derivative,
            Role::Constraint => View::Constraint,
            Role::Initialization => View::Initial,
            Role::EventSet | Role::EventAction => View::Event,
            _ => View::Value,
        }
    }
}

/// The physical quantity a state writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Target {
    Variable(VarId),
    Operator(OperatorId),
    Rand(RandId),
    /// An event condition node; `slot` distinguishes the stored quantities of one node.
    EventNode { node: u32, slot: u32 },
    Synthetic(u32),
}

/// Which storage of a target a state writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum View {
    Value,
    Derivative,
    Constraint,
    Initial,
    Event,
}

/// Stable identity of a state's storage. States sharing a key share a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataKey {
    pub target: Target,
    pub view: View,
}

impl DataKey {
    pub fn new(target: Target, view: View) -> Self { Self { target, view } }
    pub fn value(target: Target) -> Self { Self::new(target, View::Value) }
    pub fn initial(target: Target) -> Self { Self::new(target, View::Initial) }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Variable(v) => write!(f, "v{}", v.0),
            Target::Operator(o) => write!(f, "op{}", o.0),
            Target::Rand(r) => write!(f, "rand{}", r.0),
            Target::EventNode { node, slot } => write!(f, "event{}@{}", node, slot),
            Target::Synthetic(k) => write!(f, "syn{}", k),
        }
    }
}

impl fmt::Display for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.view {
            View::Value => write!(f, "{}", self.target),
            View::Derivative => write!(f, "{}'", self.target),
            View::Constraint => write!(f, "{}#constraint", self.target),
            View::Initial => write!(f, "{}#init", self.target),
            View::Event => write!(f, "{}#event", self.target),
        }
    }
}

/// One named stage of a simulation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Prepare,
    Init,
    Pre,
    PreDiff,
    Diff,
    Post,
    Events,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Prepare,
        Phase::Init,
        Phase::Pre,
        Phase::PreDiff,
        Phase::Diff,
        Phase::Post,
        Phase::Events,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Init => "init",
            Phase::Pre => "pre",
            Phase::PreDiff => "prediff",
            Phase::Diff => "diff",
            Phase::Post => "post",
            Phase::Events => "events",
        }
    }
}

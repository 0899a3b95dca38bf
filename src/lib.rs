// Compiler core: turns a model's computed states into phase schedules.
//
// Pipeline: register states on a `Session`, mine clusters of structurally
// identical formulas, build the dependency graph, then schedule each phase's
// subset into groups that keep cluster members together.

pub mod analysis;
pub mod cluster;
pub mod config;
pub mod display;
pub mod error;
pub mod graph;
pub mod session;
pub mod signature;
pub mod store;

pub use cluster::{Cluster, ClusterSet, MiningReport};
pub use config::CompilerOptions;
pub use error::{CompileError, CompileResult};
pub use graph::{DependencyFilter, DependencyGraph, DependencyGroup, PhaseSchedule};
pub use session::Session;
pub use signature::{Signature, SignatureTable};
pub use store::{DataKey, Expression, Instruction, Model, Phase, Role, StateId, Target, VarId};

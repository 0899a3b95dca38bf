//! Dependency graph over computed states: builder, filter algebra and scheduler.
pub mod dag;
pub mod edge;
pub mod filter;
pub mod resolve;
pub mod schedule;
pub mod storage;

// Re-export key types for convenient access
pub use dag::{DependencyGraph, StateEntry};
pub use edge::EdgeKind;
pub use filter::DependencyFilter;
pub use resolve::{ReferentMemo, Resolver, Stage};
pub use schedule::{DependencyGroup, PhaseSchedule};
pub use storage::NodeId;

//! Cluster Miner: groups structurally identical state formulas into shared routines.
pub mod group;
pub mod select;

pub use group::{Cluster, Member, OpenCluster};
pub use select::{mine, ClusterSet, MiningReport};

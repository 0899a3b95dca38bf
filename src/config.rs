//! config.rs
//! Opaque compiler options handed through from the surrounding CLI layer.

use crate::error::{CompileError, CompileResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 3;

/// A cluster of one is just inline code.
pub const MIN_CLUSTER_SIZE_FLOOR: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Clusters with fewer members than this are discarded.
    pub min_cluster_size: usize,
    /// Skip cluster mining entirely; every state is rendered inline.
    pub disable_clustering: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            min_cluster_size: DEFAULT_MIN_CLUSTER_SIZE,
            disable_clustering: false,
        }
    }
}

impl CompilerOptions {
    pub fn new(min_cluster_size: usize, disable_clustering: bool) -> Self {
        Self { min_cluster_size, disable_clustering }.normalized()
    }

    /// Parses options from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> CompileResult<Self> {
        let opts: Self = serde_json::from_str(text)
            .map_err(|e| CompileError::InvalidOptions(e.to_string()))?;
        Ok(opts.normalized())
    }

    pub fn normalized(mut self) -> Self {
        self.min_cluster_size = self.min_cluster_size.max(MIN_CLUSTER_SIZE_FLOOR);
        self
    }
}

//! Human-readable renderings.
pub mod dot;

pub use dot::{render, write_dot};

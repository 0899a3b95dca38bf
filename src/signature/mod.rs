//! Signature Engine: canonical structural fingerprints of expressions.
pub mod precompute;
pub mod table;

pub use precompute::{expand, fold, precompute, Precomputed};
pub use table::{shape_key, Signature, SignatureTable, PLACEHOLDER};

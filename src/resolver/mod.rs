//! Resolver (C4): assigns a row type to every node and binds every scalar
//! reference to its source. The hardest pass — see `resolve.rs` for the
//! per-node-kind algorithm.

pub mod scope;
mod resolve;
pub mod types;

pub use resolve::resolve;
pub use scope::Scope;
pub use types::{empty_row, unit_row, FieldType, Row, RowType, SCOPE_FIELD};

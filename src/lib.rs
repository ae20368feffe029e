//! A compositional SQL query builder: pipelines of relational operations
//! (`From`, `Where`, `Select`, `Join`, `Group`, ...) go in, parameterized SQL
//! text comes out, by way of a two-level IR and a four-pass pipeline —
//! Resolve, Link, Translate, Serialize.
//!
//! ```
//! use relq::ir::build::*;
//! use relq::{Catalog, Dialect, Table};
//!
//! let catalog = Catalog::new(
//!     [Table::new("person", ["id", "name", "age"]).unwrap()],
//!     Dialect::postgres(),
//! )
//! .unwrap();
//!
//! let query = select(
//!     r#where(from("person"), get("age").gt(lit(18))),
//!     [get("id"), get("name")],
//! )
//! .unwrap();
//!
//! let sql = catalog.compile(&query.0).unwrap();
//! assert!(sql.text.contains("SELECT"));
//! ```

pub mod catalog;
pub mod clause;
pub mod dialect;
pub mod error;
pub mod ir;
pub mod linker;
pub mod resolver;
pub mod serialize;
pub mod translate;

use std::collections::HashMap;

pub use catalog::{Catalog, Table};
pub use dialect::Dialect;
pub use error::{Error, ErrorMessage, ErrorMessages, Reason, Result};
pub use ir::NodeRef;
pub use serialize::SerializeOptions;

/// A compiled query: dialect-rendered SQL text plus the ordered list of
/// parameter names it references, one entry per *occurrence* — a name used
/// twice in the pipeline appears twice here, once per use, regardless of
/// the dialect's variable style.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SqlString {
    pub text: String,
    pub vars: Vec<String>,
}

/// Runs the full Resolve -> Link -> Translate -> Serialize pipeline over a
/// Semantic node, against a catalog's tables and dialect, with default
/// (compact) serialize options. Errors are downcast-able via
/// [error::downcast] into a caller-facing [ErrorMessages] list.
pub fn compile(node: &NodeRef, catalog: &Catalog) -> Result<SqlString> {
    compile_with(node, catalog, SerializeOptions::default())
}

/// Like [compile], with explicit [SerializeOptions] (e.g. pretty-printing).
/// This is the function [Catalog::compile_with] calls on a cache miss.
pub fn compile_with(
    node: &NodeRef,
    catalog: &Catalog,
    options: SerializeOptions,
) -> Result<SqlString> {
    log::debug!("resolve: assigning row types and binding references");
    let resolved = resolver::resolve(node.clone(), catalog)?;
    log::debug!("link: propagating needed columns and pruning dead joins");
    let linked = linker::link(&resolved)?;
    log::debug!("translate: building the clause tree");
    let query = translate::translate(&linked, catalog)?;
    log::debug!("serialize: rendering dialect SQL text");
    serialize::serialize(&query, &catalog.dialect, options)
}

/// Convenience wrapper: compiles and renders in one call, dropping the
/// parameter list for callers that inlined their own literals (or have none).
pub fn render(node: &NodeRef, catalog: &Catalog) -> Result<String> {
    Ok(compile(node, catalog)?.text)
}

/// Packs a [SqlString]'s parameter occurrences into a positional value
/// vector by looking each name up in `mapping`, once per occurrence — the
/// counterpart to `vars`' one-entry-per-occurrence protocol.
/// Driver execution itself is out of scope; this only orders the values a
/// caller hands to one.
pub fn pack(sql: &SqlString, mapping: &HashMap<String, serde_json::Value>) -> Result<Vec<serde_json::Value>> {
    sql.vars
        .iter()
        .map(|name| {
            mapping.get(name).cloned().ok_or_else(|| {
                Error::new(Reason::CannotFind { name: name.clone() })
                    .with_help("no value supplied for this parameter name")
                    .into()
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::build::*;

    fn catalog() -> Catalog {
        Catalog::new(
            [Table::new("person", ["id", "name", "age"]).unwrap()],
            Dialect::sqlite(),
        )
        .unwrap()
    }

    #[test]
    fn compiles_a_simple_pipeline() {
        let catalog = catalog();
        let query = select(from("person"), [get("id"), get("name")]).unwrap();
        let sql = compile(&query.0, &catalog).unwrap();
        assert!(sql.text.contains("SELECT"));
        assert!(sql.text.contains("FROM"));
    }

    #[test]
    fn pack_orders_values_by_occurrence() {
        let catalog = catalog();
        let query = r#where(from("person"), get("id").eq(var("target_id")));
        let sql = compile(&query.0, &catalog).unwrap();
        let mut mapping = HashMap::new();
        mapping.insert("target_id".to_string(), serde_json::json!(7));
        let packed = pack(&sql, &mapping).unwrap();
        assert_eq!(packed, vec![serde_json::json!(7)]);
    }

    #[test]
    fn pack_errors_on_missing_value() {
        let catalog = catalog();
        let query = r#where(from("person"), get("id").eq(var("target_id")));
        let sql = compile(&query.0, &catalog).unwrap();
        assert!(pack(&sql, &HashMap::new()).is_err());
    }

    #[test]
    fn cache_hits_on_repeated_compile() {
        let catalog = catalog();
        let query = select(from("person"), [get("id")]).unwrap();
        catalog.compile(&query.0).unwrap();
        catalog.compile(&query.0).unwrap();
        assert_eq!(catalog.cache_len(), 1);
    }
}

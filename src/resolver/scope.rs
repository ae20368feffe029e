//! Name scope threaded through the resolver: named subqueries introduced by
//! `With`/`Over`/`Iterate` (reachable via `From(name)`) and `Bind` frames
//! (reachable via `Var(name)`, resolved to nearest enclosing frame that
//! supplies the name).

use super::types::Row;
use crate::ir::NodeRef;

#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Named pipelines in scope for `From(name)`, innermost last.
    tables: Vec<(String, Row)>,
    /// `Bind` frames, innermost last. Each frame maps a `Var` name to the
    /// expression it is bound to, resolved in the *outer* scope.
    binds: Vec<Vec<(String, NodeRef)>>,
}

impl Scope {
    pub fn with_table(&self, name: impl Into<String>, row: Row) -> Scope {
        let mut s = self.clone();
        s.tables.push((name.into(), row));
        s
    }

    pub fn lookup_table(&self, name: &str) -> Option<&Row> {
        self.tables
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    pub fn with_bind_frame(&self, args: Vec<(String, NodeRef)>) -> Scope {
        let mut s = self.clone();
        s.binds.push(args);
        s
    }

    /// Nearest enclosing `Bind` frame supplying `name`, and its depth (0 =
    /// innermost) — used to rewrite `Var(name)` into `BoundVariable(name,
    /// depth)`.
    pub fn lookup_var(&self, name: &str) -> Option<(usize, &NodeRef)> {
        for (depth, frame) in self.binds.iter().rev().enumerate() {
            if let Some((_, expr)) = frame.iter().find(|(n, _)| n == name) {
                return Some((depth, expr));
            }
        }
        None
    }
}

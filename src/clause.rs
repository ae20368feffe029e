//! Syntactic IR (C3): the clause tree mirroring SQL grammar productions.
//!
//! Built fresh by the translator and consumed by the serializer; it never
//! references Semantic nodes, and is immutable once built (every
//! constructor below returns an owned value, never a handle back into the
//! Semantic graph).

use serde::{Deserialize, Serialize};

pub use crate::ir::{Frame, Literal, NullsOrder, SortOrder};

/// A full query: a single `SELECT`, a `UNION ALL` chain (`Append`), or a
/// `WITH RECURSIVE` wrapper (`Iterate`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Select(Box<Select>),
    SetOp {
        op: SetOp,
        branches: Vec<Query>,
    },
    /// Common table expressions hoisted ahead of `body`: `With` emits CTEs
    /// ahead of the parent SELECT. A recursive CTE
    /// (from `Iterate`) is just a [Cte] with `recursive: true` whose body is
    /// a `SetOp(UnionAll, [seed, iterator])` — the only thing "recursive"
    /// changes syntactically is the leading `WITH RECURSIVE` keyword and
    /// the self-reference available while translating the iterator branch.
    With {
        ctes: Vec<Cte>,
        body: Box<Query>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOp {
    UnionAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Select {
    pub distinct: bool,
    pub top: Option<i64>,
    pub projection: Vec<Expr>,
    pub from: From,
    pub joins: Vec<Join>,
    pub where_: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub windows: Vec<NamedWindow>,
    pub order_by: Vec<Sort>,
    pub limit: Option<Limit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cte {
    pub name: String,
    pub columns: Vec<String>,
    pub query: Box<Query>,
    pub materialized: bool,
    /// `true` for the CTE an `Iterate` produces: `query` is a
    /// `SetOp(UnionAll, [seed, iterator])`, and the leading keyword becomes
    /// `WITH RECURSIVE` rather than `WITH` for the whole list.
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum From {
    #[default]
    Nothing,
    Table {
        name: String,
        alias: String,
    },
    Subquery {
        query: Box<Query>,
        alias: String,
    },
    Values {
        rows: Vec<Vec<Literal>>,
        alias: String,
        columns: Vec<String>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
        alias: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub lateral: bool,
    pub from: From,
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedWindow {
    pub name: String,
    pub spec: WindowSpec,
}

/// Either an inline `OVER (...)` spec or a reference to a named [NamedWindow]
/// declared in the enclosing `Select`'s `WINDOW` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OverClause {
    Inline(Box<WindowSpec>),
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<Sort>,
    pub frame: Option<Frame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub value: Expr,
    pub order: SortOrder,
    pub nulls: Option<NullsOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub offset: Option<i64>,
    pub count: Option<i64>,
    pub with_ties: bool,
}

/// Expression clauses: the value nodes that populate a [Select]'s slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A column reference, optionally table-qualified (`"alias"."name"`).
    Id {
        qualifier: Option<String>,
        name: String,
    },
    Lit(Literal),
    /// A free query parameter, carried by its original name so the
    /// serializer can render it per the dialect's parameter style.
    Param(String),
    /// An operator rendered infix (`a = b`, `a AND b`); `name` is the
    /// already-normalized SQL spelling (`=`, `<>`, `AND`, ...).
    Op {
        name: String,
        args: Vec<Expr>,
    },
    /// A named function call, rendered `NAME(args...)`. `template`
    /// supports `?`-placeholder rendering for functions whose SQL spelling
    /// isn't simply `NAME(args)` (e.g. `EXTRACT(YEAR FROM ?)`).
    Fun {
        name: String,
        args: Vec<Expr>,
        template: Option<String>,
    },
    Agg {
        name: String,
        args: Vec<Expr>,
        filter: Option<Box<Expr>>,
        over: Option<OverClause>,
    },
    Case {
        branches: Vec<(Expr, Expr)>,
        else_: Option<Box<Expr>>,
    },
    Sort(Box<Sort>),
    Partition(Box<WindowSpec>),
    As {
        inner: Box<Expr>,
        name: String,
    },
    /// A bare keyword token (`DEFAULT`, `NULL` in a non-literal position).
    Kw(String),
    /// A non-semantic annotation, e.g. a comment explaining an `Append`
    /// branch that dropped a non-intersecting column.
    Note(String),
    /// A correlated subquery used in scalar/expression position.
    Subquery(Box<Query>),
}

impl Expr {
    pub fn id(name: impl Into<String>) -> Expr {
        Expr::Id {
            qualifier: None,
            name: name.into(),
        }
    }
    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Expr {
        Expr::Id {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }
}

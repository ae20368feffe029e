//! Semantic IR (C2): the user-facing pipeline graph.
//!
//! A [Node] is a tagged variant whose shape is recursively composed of other
//! nodes or scalars. Every operation that takes a pipeline input carries a
//! single *tail* reference (the input pipeline), held behind an [Rc] so that
//! the graph is a DAG with shared subtrees and cheap structural equality.
//!
//! Nodes are immutable once built: the compiler never mutates a
//! user-supplied [Node]; every pass produces a fresh annotated copy.

pub mod build;
pub mod fold;
mod literal;

use std::rc::Rc;

use serde::{Deserialize, Serialize};

pub use literal::Literal;

/// Reference-counted, immutable handle to a [Node]. Cloning a [NodeRef] is
/// cheap and preserves sharing, which is what makes the graph a DAG rather
/// than a tree.
pub type NodeRef = Rc<Node>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// Explicit label from a surrounding `As`, if any. Falls back to the
    /// node kind's default label (see [Node::default_label]) when absent.
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum NodeKind {
    // ---- Pipeline nodes --------------------------------------------------
    /// `From(None)` is the unit-row source consumed by queries with no base
    /// table (e.g. `Select(Lit(1))`); `From(Some(name))` looks the name up
    /// in the catalog.
    From(Option<String>),
    Where {
        tail: NodeRef,
        cond: NodeRef,
    },
    Select {
        tail: NodeRef,
        items: Vec<NodeRef>,
    },
    Define {
        tail: NodeRef,
        items: Vec<NodeRef>,
    },
    Join {
        tail: NodeRef,
        joinee: NodeRef,
        on: NodeRef,
        left: bool,
        right: bool,
        optional: bool,
        lateral: bool,
    },
    Append {
        tail: NodeRef,
        others: Vec<NodeRef>,
    },
    Iterate {
        tail: NodeRef,
        iterator: NodeRef,
    },
    With {
        tail: NodeRef,
        args: Vec<NodeRef>,
        materialized: bool,
    },
    /// `WithExternal` materializes `args` as real temp tables via `handler`
    /// before the main query is serialized.
    WithExternal {
        tail: NodeRef,
        args: Vec<NodeRef>,
        handler: ExternalHandler,
    },
    Bind {
        tail: NodeRef,
        args: Vec<NodeRef>,
    },
    Group {
        tail: NodeRef,
        keys: Vec<NodeRef>,
    },
    Partition {
        tail: NodeRef,
        keys: Vec<NodeRef>,
        order_by: Vec<NodeRef>,
        frame: Frame,
    },
    Order {
        tail: NodeRef,
        by: Vec<NodeRef>,
    },
    Limit {
        tail: NodeRef,
        offset: Option<i64>,
        count: Option<i64>,
        with_ties: bool,
    },
    As {
        tail: NodeRef,
        name: String,
    },

    // ---- Scalar nodes -----------------------------------------------------
    /// `Get(name, inner)`: `inner` is `Some` for a chained lookup (`Get("x",
    /// Some(Get("y")))` looks up `y` then `x` within it).
    Get {
        name: String,
        inner: Option<NodeRef>,
    },
    Var(String),
    Lit(Literal),
    Fun {
        name: String,
        args: Vec<NodeRef>,
    },
    Agg {
        name: String,
        args: Vec<NodeRef>,
        filter: Option<NodeRef>,
    },
    Sort {
        value: NodeRef,
        order: SortOrder,
        nulls: Option<NullsOrder>,
    },

    // ---- Internal: produced by the compiler, never by the user ----------
    Resolved {
        inner: NodeRef,
        ty: crate::resolver::RowType,
    },
    Linked {
        inner: NodeRef,
        refs: Vec<String>,
        n_ext_refs: usize,
    },
    Nested {
        name: String,
    },
    BoundVariable {
        name: String,
        depth: usize,
    },
    RoutedJoin {
        inner: NodeRef,
        keep: bool,
    },
    IsolatedSubquery(NodeRef),
    FromNothing,
    FromTable(String),
    FromTableExpression(NodeRef),
    FromIterate(NodeRef),
    FromValues(Vec<Vec<Literal>>),
    FromFunction {
        name: String,
        args: Vec<NodeRef>,
    },
    /// A placeholder column that exists only to give a pipeline a non-empty
    /// row type; always projected out before the root is reached.
    Padding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    pub start: FrameBound,
    pub end: FrameBound,
    pub exclusion: Option<FrameExclusion>,
}

impl Default for Frame {
    fn default() -> Self {
        Frame {
            kind: FrameKind::Rows,
            start: FrameBound::UnboundedPreceding,
            end: FrameBound::CurrentRow,
            exclusion: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Rows,
    Range,
    Groups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(i64),
    CurrentRow,
    Following(i64),
    UnboundedFollowing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameExclusion {
    Group,
    Ties,
    NoOthers,
}

/// Extension point invoked once per `WithExternal` table, before the main
/// SELECT is serialized, in declaration order. Not (de)serializable, since
/// it's a host callback rather than data; kept out of the serde-derived IR
/// the same way other non-data trait objects are.
#[derive(Clone)]
pub struct ExternalHandler(pub Rc<dyn Fn(&str, &Node) -> anyhow::Result<()>>);

impl std::fmt::Debug for ExternalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExternalHandler(..)")
    }
}

impl PartialEq for ExternalHandler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Serialize for ExternalHandler {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_unit()
    }
}

impl<'de> Deserialize<'de> for ExternalHandler {
    fn deserialize<D: serde::Deserializer<'de>>(_: D) -> Result<Self, D::Error> {
        Err(serde::de::Error::custom(
            "ExternalHandler cannot be deserialized",
        ))
    }
}

impl Node {
    pub fn new(kind: NodeKind) -> NodeRef {
        Rc::new(Node { kind, label: None })
    }

    pub fn labeled(kind: NodeKind, label: impl Into<String>) -> NodeRef {
        Rc::new(Node {
            kind,
            label: Some(label.into()),
        })
    }

    /// The label this node exposes to its parent absent an explicit `As`.
    pub fn default_label(&self) -> Option<String> {
        if self.label.is_some() {
            return self.label.clone();
        }
        match &self.kind {
            NodeKind::Get { name, .. } => Some(name.clone()),
            NodeKind::Var(name) => Some(name.clone()),
            NodeKind::Agg { name, .. } => Some(name.clone()),
            NodeKind::Fun { name, .. } => Some(name.clone()),
            NodeKind::As { name, .. } => Some(name.clone()),
            _ => None,
        }
    }

    /// Input pipeline of this node, if it has one (scalar nodes don't).
    pub fn tail(&self) -> Option<&NodeRef> {
        use NodeKind::*;
        match &self.kind {
            Where { tail, .. }
            | Select { tail, .. }
            | Define { tail, .. }
            | Join { tail, .. }
            | Append { tail, .. }
            | Iterate { tail, .. }
            | With { tail, .. }
            | WithExternal { tail, .. }
            | Bind { tail, .. }
            | Group { tail, .. }
            | Partition { tail, .. }
            | Order { tail, .. }
            | Limit { tail, .. }
            | As { tail, .. } => Some(tail),
            _ => None,
        }
    }
}

/// Structural hash of a Semantic node, used as part of the compiled-query
/// cache key alongside dialect identity. `Node` can't derive `Hash` directly
/// since `Literal::Float`
/// holds an `f64`; hashing the `Debug` text is a cheap, good-enough stand-in
/// since `Debug` already walks the whole structure deterministically and two
/// structurally equal nodes always produce the same text.
pub fn debug_hash(node: &NodeRef, hasher: &mut impl std::hash::Hasher) {
    use std::hash::Hash;
    format!("{node:?}").hash(hasher);
}

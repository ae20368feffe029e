//! Query-construction API: the pipeline builder surface.
//!
//! Builder functions return [Expr], a thin `NodeRef` wrapper that carries
//! operator overloads (`+`, `-`, `*`, `/`, `&`, `|`, `!`) and comparison/
//! boolean methods (`.eq`, `.lt`, `.and`, ...) as the Rust translation of a
//! broadcasting operator surface (`.==` -> `eq`, `.&` -> `and`, `!` -> `not`,
//! etc). Rust's `PartialEq`/`Index` can't be overloaded to return anything
//! but `bool`/`&Output`, so rather than the three interchangeable surface
//! forms a dynamic host language can offer (`get("x")`, `get["x"]`,
//! `col("x")`), we expose two: a free function `get("x")` / `col("x")`
//! (identical; `col` reads better in a projection list) and a builder method
//! on [Expr] for chained inner lookups — documented as an Open Question
//! resolution in DESIGN.md.
//!
//! Constructors whose error conditions are checked eagerly at construction
//! time (`DuplicateLabel` for `Select`/`Define`/`With`/`Bind`/`Group`/
//! `Partition`'s item lists, `InvalidArity` for known functions) return
//! `Result<Expr>`; everything else is infallible.

use std::rc::Rc;

use crate::error::{Error, Reason, Result};
use crate::ir::{Frame, Literal, Node, NodeKind, NodeRef};

/// A builder handle around a [NodeRef]. Cheap to clone (bumps the `Rc`
/// refcount); this is what the pipeline API passes around.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr(pub NodeRef);

impl From<Expr> for NodeRef {
    fn from(e: Expr) -> NodeRef {
        e.0
    }
}
impl From<NodeRef> for Expr {
    fn from(n: NodeRef) -> Expr {
        Expr(n)
    }
}

impl Expr {
    pub fn node(&self) -> NodeRef {
        self.0.clone()
    }

    /// `Get(name, Some(self))`: `self.get("b")` peels a nested record's
    /// column or continues a dotted chain, e.g. `col("l").get("state")`.
    pub fn get(&self, name: impl Into<String>) -> Expr {
        Expr(Node::new(NodeKind::Get {
            name: name.into(),
            inner: Some(self.0.clone()),
        }))
    }

    pub fn r#as(&self, name: impl Into<String>) -> Expr {
        if self.0.tail().is_some() {
            Expr(Node::new(NodeKind::As {
                tail: self.0.clone(),
                name: name.into(),
            }))
        } else {
            Expr(Node::labeled(self.0.as_ref().kind.clone(), name.into()))
        }
    }

    fn binop(&self, name: &str, rhs: impl IntoExpr) -> Expr {
        fun(name, [self.clone(), rhs.into_expr()]).expect("binary operators are always arity 2")
    }

    pub fn eq(&self, rhs: impl IntoExpr) -> Expr {
        self.binop("=", rhs)
    }
    pub fn ne(&self, rhs: impl IntoExpr) -> Expr {
        self.binop("<>", rhs)
    }
    pub fn lt(&self, rhs: impl IntoExpr) -> Expr {
        self.binop("<", rhs)
    }
    pub fn lte(&self, rhs: impl IntoExpr) -> Expr {
        self.binop("<=", rhs)
    }
    pub fn gt(&self, rhs: impl IntoExpr) -> Expr {
        self.binop(">", rhs)
    }
    pub fn gte(&self, rhs: impl IntoExpr) -> Expr {
        self.binop(">=", rhs)
    }
    pub fn and(&self, rhs: impl IntoExpr) -> Expr {
        self.binop("and", rhs)
    }
    pub fn or(&self, rhs: impl IntoExpr) -> Expr {
        self.binop("or", rhs)
    }
    pub fn not(&self) -> Expr {
        fun("not", [self.clone()]).expect("not() is always arity 1")
    }

    pub fn asc(&self) -> Expr {
        Expr(Node::new(NodeKind::Sort {
            value: self.0.clone(),
            order: crate::ir::SortOrder::Asc,
            nulls: None,
        }))
    }
    pub fn desc(&self) -> Expr {
        Expr(Node::new(NodeKind::Sort {
            value: self.0.clone(),
            order: crate::ir::SortOrder::Desc,
            nulls: None,
        }))
    }
    pub fn nulls_first(&self) -> Expr {
        self.with_nulls(crate::ir::NullsOrder::First)
    }
    pub fn nulls_last(&self) -> Expr {
        self.with_nulls(crate::ir::NullsOrder::Last)
    }
    fn with_nulls(&self, nulls: crate::ir::NullsOrder) -> Expr {
        match &self.0.kind {
            NodeKind::Sort { value, order, .. } => Expr(Node::new(NodeKind::Sort {
                value: value.clone(),
                order: *order,
                nulls: Some(nulls),
            })),
            _ => Expr(Node::new(NodeKind::Sort {
                value: self.0.clone(),
                order: crate::ir::SortOrder::Asc,
                nulls: Some(nulls),
            })),
        }
    }

    // ---- Pipeline-chaining methods (surface sugar for `|>`) --------------

    pub fn pipe_where(&self, cond: impl IntoExpr) -> Expr {
        r#where(self.clone(), cond)
    }
    pub fn select(&self, items: impl IntoExprList) -> Result<Expr> {
        select(self.clone(), items)
    }
    pub fn define(&self, items: impl IntoExprList) -> Result<Expr> {
        define(self.clone(), items)
    }
    pub fn order_by(&self, by: impl IntoExprList) -> Expr {
        order(self.clone(), by)
    }
    pub fn limit(&self, count: i64) -> Expr {
        limit(self.clone(), None, Some(count), false)
    }
    pub fn group(&self, keys: impl IntoExprList) -> Result<Expr> {
        group(self.clone(), keys)
    }
}

macro_rules! arith_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                fun($op, [self, rhs]).expect("binary operators are always arity 2")
            }
        }
    };
}
arith_op!(Add, add, "+");
arith_op!(Sub, sub, "-");
arith_op!(Mul, mul, "*");
arith_op!(Div, div, "/");
arith_op!(BitAnd, bitand, "and");
arith_op!(BitOr, bitor, "or");

impl std::ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::not(&self)
    }
}

/// Anything that can be lifted into a scalar [Expr]: an existing [Expr], or
/// a host primitive that becomes a `Lit`.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}
impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}
impl IntoExpr for &Expr {
    fn into_expr(self) -> Expr {
        self.clone()
    }
}
impl IntoExpr for NodeRef {
    fn into_expr(self) -> Expr {
        Expr(self)
    }
}
macro_rules! lit_into_expr {
    ($t:ty) => {
        impl IntoExpr for $t {
            fn into_expr(self) -> Expr {
                lit(self)
            }
        }
    };
}
lit_into_expr!(bool);
lit_into_expr!(i64);
lit_into_expr!(i32);
lit_into_expr!(f64);
lit_into_expr!(&str);
lit_into_expr!(String);

/// A list of items accepted by `Select`/`Define`/`Group`/`Partition`/`Order`/
/// `With`/`Bind`: either a single expr or a `Vec`/array/tuple of them. A
/// `name => pipeline` pair is sugar for `pipeline |> As(name)`.
pub trait IntoExprList {
    fn into_expr_list(self) -> Vec<NodeRef>;
}
impl IntoExprList for Expr {
    fn into_expr_list(self) -> Vec<NodeRef> {
        vec![self.0]
    }
}
impl IntoExprList for Vec<Expr> {
    fn into_expr_list(self) -> Vec<NodeRef> {
        self.into_iter().map(|e| e.0).collect()
    }
}
impl<const N: usize> IntoExprList for [Expr; N] {
    fn into_expr_list(self) -> Vec<NodeRef> {
        self.into_iter().map(|e| e.0).collect()
    }
}
impl IntoExprList for (&str, Expr) {
    fn into_expr_list(self) -> Vec<NodeRef> {
        vec![self.1.r#as(self.0).0]
    }
}
impl<const N: usize> IntoExprList for [(&str, Expr); N] {
    fn into_expr_list(self) -> Vec<NodeRef> {
        self.into_iter().map(|(n, e)| e.r#as(n).0).collect()
    }
}

// ---- Scalar constructors --------------------------------------------------

pub fn lit(value: impl Into<Literal>) -> Expr {
    Expr(Node::new(NodeKind::Lit(value.into())))
}

pub fn get(name: impl Into<String>) -> Expr {
    Expr(Node::new(NodeKind::Get {
        name: name.into(),
        inner: None,
    }))
}

/// Alias for [get]: reads better as `col("person_id")` in a projection list.
pub fn col(name: impl Into<String>) -> Expr {
    get(name)
}

pub fn var(name: impl Into<String>) -> Expr {
    Expr(Node::new(NodeKind::Var(name.into())))
}

pub fn fun<const N: usize>(name: impl Into<String>, args: [Expr; N]) -> Result<Expr> {
    let name = name.into();
    check_arity(&name, N)?;
    Ok(Expr(Node::new(NodeKind::Fun {
        name,
        args: args.into_iter().map(|e| e.0).collect(),
    })))
}

pub fn fun_vec(name: impl Into<String>, args: Vec<Expr>) -> Result<Expr> {
    let name = name.into();
    check_arity(&name, args.len())?;
    Ok(Expr(Node::new(NodeKind::Fun {
        name,
        args: args.into_iter().map(|e| e.0).collect(),
    })))
}

pub fn agg<const N: usize>(name: impl Into<String>, args: [Expr; N]) -> Result<Expr> {
    let name = name.into();
    check_arity(&name, N)?;
    Ok(Expr(Node::new(NodeKind::Agg {
        name,
        args: args.into_iter().map(|e| e.0).collect(),
        filter: None,
    })))
}

/// `Agg("count")` with no arguments, i.e. `COUNT(*)`.
pub fn count() -> Expr {
    Expr(Node::new(NodeKind::Agg {
        name: "count".into(),
        args: vec![],
        filter: None,
    }))
}

pub fn agg_filter<const N: usize>(
    name: impl Into<String>,
    args: [Expr; N],
    filter: Expr,
) -> Result<Expr> {
    let name = name.into();
    check_arity(&name, N)?;
    Ok(Expr(Node::new(NodeKind::Agg {
        name,
        args: args.into_iter().map(|e| e.0).collect(),
        filter: Some(filter.0),
    })))
}

// ---- Pipeline constructors -------------------------------------------------

pub fn from(name: impl Into<String>) -> Expr {
    Expr(Node::new(NodeKind::From(Some(name.into()))))
}

/// The unit-row source: a pipeline with no base table.
pub fn from_nothing() -> Expr {
    Expr(Node::new(NodeKind::From(None)))
}

pub fn r#where(tail: impl IntoExpr, cond: impl IntoExpr) -> Expr {
    Expr(Node::new(NodeKind::Where {
        tail: tail.into_expr().0,
        cond: cond.into_expr().0,
    }))
}

pub fn select(tail: impl IntoExpr, items: impl IntoExprList) -> Result<Expr> {
    let items = items.into_expr_list();
    check_unique_labels(&items)?;
    Ok(Expr(Node::new(NodeKind::Select {
        tail: tail.into_expr().0,
        items,
    })))
}

pub fn define(tail: impl IntoExpr, items: impl IntoExprList) -> Result<Expr> {
    let items = items.into_expr_list();
    check_unique_labels(&items)?;
    Ok(Expr(Node::new(NodeKind::Define {
        tail: tail.into_expr().0,
        items,
    })))
}

#[allow(clippy::too_many_arguments)]
pub fn join(
    tail: impl IntoExpr,
    joinee: impl IntoExpr,
    on: impl IntoExpr,
    left: bool,
    right: bool,
    optional: bool,
    lateral: bool,
) -> Expr {
    Expr(Node::new(NodeKind::Join {
        tail: tail.into_expr().0,
        joinee: joinee.into_expr().0,
        on: on.into_expr().0,
        left,
        right,
        optional,
        lateral,
    }))
}

/// `Join` with `left=true` preset, a composite-operator convenience.
pub fn left_join(tail: impl IntoExpr, joinee: impl IntoExpr, on: impl IntoExpr) -> Expr {
    join(tail, joinee, on, true, false, true, false)
}

/// `Join` with `on=TRUE` preset, rendered as `CROSS JOIN`.
pub fn cross_join(tail: impl IntoExpr, joinee: impl IntoExpr) -> Expr {
    join(tail, joinee, lit(true), false, false, false, false)
}

pub fn append(tail: impl IntoExpr, others: impl IntoExprList) -> Expr {
    Expr(Node::new(NodeKind::Append {
        tail: tail.into_expr().0,
        others: others.into_expr_list(),
    }))
}

pub fn iterate(seed: impl IntoExpr, iterator: impl IntoExpr) -> Expr {
    Expr(Node::new(NodeKind::Iterate {
        tail: seed.into_expr().0,
        iterator: iterator.into_expr().0,
    }))
}

pub fn with(tail: impl IntoExpr, args: impl IntoExprList, materialized: bool) -> Result<Expr> {
    let args = args.into_expr_list();
    check_unique_labels(&args)?;
    Ok(Expr(Node::new(NodeKind::With {
        tail: tail.into_expr().0,
        args,
        materialized,
    })))
}

/// `WithExternal`: materialize `args` as real temp tables via `handler`
/// before the main SELECT is serialized.
pub fn with_external(
    tail: impl IntoExpr,
    args: impl IntoExprList,
    handler: Rc<dyn Fn(&str, &Node) -> anyhow::Result<()>>,
) -> Result<Expr> {
    let args = args.into_expr_list();
    check_unique_labels(&args)?;
    Ok(Expr(Node::new(NodeKind::WithExternal {
        tail: tail.into_expr().0,
        args,
        handler: crate::ir::ExternalHandler(handler),
    })))
}

pub fn bind(tail: impl IntoExpr, args: impl IntoExprList) -> Result<Expr> {
    let args = args.into_expr_list();
    check_unique_labels(&args)?;
    Ok(Expr(Node::new(NodeKind::Bind {
        tail: tail.into_expr().0,
        args,
    })))
}

pub fn group(tail: impl IntoExpr, keys: impl IntoExprList) -> Result<Expr> {
    let keys = keys.into_expr_list();
    check_unique_labels(&keys)?;
    Ok(Expr(Node::new(NodeKind::Group {
        tail: tail.into_expr().0,
        keys,
    })))
}

pub fn partition(
    tail: impl IntoExpr,
    keys: impl IntoExprList,
    order_by: impl IntoExprList,
    frame: Frame,
) -> Result<Expr> {
    let keys = keys.into_expr_list();
    check_unique_labels(&keys)?;
    Ok(Expr(Node::new(NodeKind::Partition {
        tail: tail.into_expr().0,
        keys,
        order_by: order_by.into_expr_list(),
        frame,
    })))
}

pub fn order(tail: impl IntoExpr, by: impl IntoExprList) -> Expr {
    Expr(Node::new(NodeKind::Order {
        tail: tail.into_expr().0,
        by: by.into_expr_list(),
    }))
}

pub fn limit(
    tail: impl IntoExpr,
    offset: Option<i64>,
    count: Option<i64>,
    with_ties: bool,
) -> Expr {
    Expr(Node::new(NodeKind::Limit {
        tail: tail.into_expr().0,
        offset,
        count,
        with_ties,
    }))
}

/// Validates construction-time invariants: duplicate labels among a
/// `Select`/`Define`/`With`/`Bind`/`Group`/`Partition` item list.
pub fn check_unique_labels(items: &[NodeRef]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for item in items {
        if let Some(label) = item.default_label() {
            if !seen.insert(label.clone()) {
                return Err(Error::new(Reason::DuplicateLabel { name: label }).into());
            }
        }
    }
    Ok(())
}

/// Per-function arity table for the handful of functions this crate treats
/// as "known". Anything else passes through opaque, unvalidated.
pub fn check_arity(name: &str, got: usize) -> Result<()> {
    let expected: Option<(usize, usize)> = match name {
        "count" => Some((0, 1)),
        "sum" | "avg" | "min" | "max" => Some((1, 1)),
        "not" => Some((1, 1)),
        "in" => None, // variadic
        "case" => None,
        "=" | "<>" | "<" | "<=" | ">" | ">=" | "and" | "or" | "+" | "-" | "*" | "/" => Some((2, 2)),
        _ => return Ok(()),
    };
    if let Some((min, max)) = expected {
        if got < min || got > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{min}-{max}")
            };
            return Err(Error::new(Reason::InvalidArity {
                name: name.to_string(),
                got,
                expected,
            })
            .into());
        }
    }
    Ok(())
}

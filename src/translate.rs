//! Translator (C6): turns a Linked Semantic tree into a Syntactic [Query].
//!
//! The core model is a slot-ordered SQL grammar: a single `SELECT` fills its
//! slots in a fixed order (`FROM`/`JOIN`/`WHERE`/`GROUP`/`HAVING`/`WINDOW`/
//! `ORDER`/`LIMIT`), and `SELECT` itself acts as a forced "close". A pipeline
//! operation that would fill a slot the cursor has already passed (or a
//! non-accretable slot it's already filled) closes the in-progress
//! [Builder] — wraps it as a `FROM` subquery under a fresh alias — and
//! starts a fresh one. This mirrors how a hand-written SQL generator reading
//! a pipeline left to right would decide when it's forced to nest.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::catalog::Catalog;
use crate::clause::{
    self, Cte, Expr, From, Join, JoinKind, Limit, NamedWindow, OverClause, Query, Select, SetOp,
    Sort, WindowSpec,
};
use crate::error::{Error, Reason, Result};
use crate::ir::{ExternalHandler, Literal, NodeKind, NodeRef};

const S_FROM: u8 = 0;
const S_JOIN: u8 = 1;
const S_WHERE: u8 = 2;
const S_GROUP: u8 = 3;
const S_HAVING: u8 = 4;
const S_WINDOW: u8 = 5;
const S_ORDER: u8 = 6;
const S_LIMIT: u8 = 7;

/// A flat column-name -> expression map, plus one level of nesting for
/// `Join`ees wrapped in `As` (`Get("state", Some(Get("l")))`). Supporting a
/// single level of nesting covers every shape the builder surface actually
/// produces (`As` only ever wraps a `Join`'s joinee in practice); deeper
/// chains fall back to an `OrphanReference` error rather than silently
/// misresolving — see DESIGN.md.
#[derive(Debug, Clone, Default)]
struct Builder {
    select: Select,
    columns: IndexMap<String, Expr>,
    nested: IndexMap<String, IndexMap<String, Expr>>,
    cursor: u8,
    has_group: bool,
    explicit_projection: bool,
    agg_scope: Option<(IndexMap<String, Expr>, IndexMap<String, IndexMap<String, Expr>>)>,
    active_window: Option<String>,
    /// Name this builder's alias counter was drawn from — the table name for
    /// a leaf `From`, carried through every operation that doesn't change
    /// the row source, so a forced `close` reuses it (`person` -> `person_2`)
    /// instead of a generic placeholder.
    base: String,
}

/// The column scope a scalar expression is translated against: the current
/// row (`columns`/`nested`), the pre-`Group`/`Partition` row for `Agg`
/// arguments (`agg`), and the name of the currently active named window
/// (for an `Agg`'s implicit `OVER`).
struct Scope<'a> {
    columns: &'a IndexMap<String, Expr>,
    nested: &'a IndexMap<String, IndexMap<String, Expr>>,
    agg: Option<(&'a IndexMap<String, Expr>, &'a IndexMap<String, IndexMap<String, Expr>>)>,
    window: Option<&'a str>,
}

fn current_scope(b: &Builder) -> Scope<'_> {
    Scope {
        columns: &b.columns,
        nested: &b.nested,
        agg: b.agg_scope.as_ref().map(|(c, n)| (c, n)),
        window: b.active_window.as_deref(),
    }
}

struct Ctx<'a> {
    catalog: &'a Catalog,
    alias_counters: HashMap<String, u32>,
    /// label -> SQL name, for `From(Some(label))` references into a `With`
    /// CTE, a `WithExternal` temp table, or an `Iterate` self-reference.
    scope: Vec<(String, String)>,
    /// `Bind` frames, innermost last; each entry is (name, translated expr).
    binds: Vec<Vec<(String, Expr)>>,
    ctes: Vec<Cte>,
    window_counter: u32,
}

impl<'a> Ctx<'a> {
    fn new(catalog: &'a Catalog) -> Self {
        Ctx {
            catalog,
            alias_counters: HashMap::new(),
            scope: Vec::new(),
            binds: Vec::new(),
            ctes: Vec::new(),
            window_counter: 0,
        }
    }

    fn lookup_bind(&self, depth: usize, name: &str) -> Result<Expr> {
        let idx = self
            .binds
            .len()
            .checked_sub(1 + depth)
            .ok_or_else(|| Error::new(Reason::OrphanReference { name: name.to_string() }))?;
        self.binds[idx]
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| Error::new(Reason::CannotFind { name: name.to_string() }).into())
    }
}

fn fresh_alias(ctx: &mut Ctx, base: &str) -> String {
    let n = ctx.alias_counters.entry(base.to_string()).or_insert(0);
    *n += 1;
    format!("{base}_{n}")
}

fn resolve_from_name(name: &str, ctx: &Ctx) -> Result<String> {
    for (label, sql_name) in ctx.scope.iter().rev() {
        if label == name {
            return Ok(sql_name.clone());
        }
    }
    Ok(ctx.catalog.lookup(name)?.qualified_name())
}

/// Peels `Resolved`/`Linked` wrappers to the plain semantic node beneath,
/// for the pieces of the node (kind tag, explicit label) that translation
/// needs but resolution/linking only ever annotate, never replace.
fn inner_node(node: &NodeRef) -> &NodeRef {
    match &node.kind {
        NodeKind::Linked { inner, .. } => inner_node(inner),
        NodeKind::Resolved { inner, .. } => inner,
        _ => node,
    }
}

fn item_label(node: &NodeRef) -> Result<String> {
    inner_node(node)
        .default_label()
        .ok_or_else(|| Error::new(Reason::Simple("item has no label".into())).into())
}

/// Rebuilds a plain semantic node with every `Resolved`/`Linked`/`RoutedJoin`
/// annotation stripped, for [crate::ir::ExternalHandler] callbacks (which
/// take the Semantic shape the caller originally built, not our internal
/// bookkeeping wrappers).
fn strip_annotations(node: &NodeRef) -> NodeRef {
    use crate::ir::fold::{fold_node, NodeFold};
    struct Stripper;
    impl NodeFold for Stripper {
        fn fold_node(&mut self, node: NodeRef) -> Result<NodeRef> {
            match &node.kind {
                NodeKind::Resolved { inner, .. } => self.fold_node(inner.clone()),
                NodeKind::Linked { inner, .. } => self.fold_node(inner.clone()),
                NodeKind::RoutedJoin { inner, .. } => self.fold_node(inner.clone()),
                _ => fold_node(self, node),
            }
        }
    }
    Stripper.fold_node(node.clone()).expect("stripping never fails")
}

// ---- Entry point -----------------------------------------------------------

pub fn translate(node: &NodeRef, catalog: &Catalog) -> Result<Query> {
    let mut ctx = Ctx::new(catalog);
    let (b, refs, _) = translate_node(node, &mut ctx)?;
    let select = finalize(b, &refs);
    let mut query = Query::Select(Box::new(select));
    if !ctx.ctes.is_empty() {
        query = Query::With {
            ctes: std::mem::take(&mut ctx.ctes),
            body: Box::new(query),
        };
    }
    Ok(query)
}

// ---- Node dispatch ----------------------------------------------------------

/// Translates a pipeline node, returning its builder, its own `Linked.refs`
/// (in declaration order — used by the parent to order a forced subquery's
/// projection), and, if this node is an immediate `As(name, ...)` wrapper,
/// the name it exposes (so a `Join`'s joinee can register a nested scope).
fn translate_node(node: &NodeRef, ctx: &mut Ctx) -> Result<(Builder, Vec<String>, Option<String>)> {
    match &node.kind {
        NodeKind::RoutedJoin { inner, .. } => translate_node(inner, ctx),
        NodeKind::Linked { inner, refs, .. } => {
            let plain = match &inner.kind {
                NodeKind::Resolved { inner: plain, .. } => plain,
                other => unreachable!("expected Resolved under Linked, got {other:?}"),
            };
            if let NodeKind::As { tail, name } = &plain.kind {
                let (b, _, _) = translate_node(tail, ctx)?;
                Ok((b, refs.clone(), Some(name.clone())))
            } else {
                let b = translate_linked(inner, refs, ctx)?;
                Ok((b, refs.clone(), None))
            }
        }
        other => unreachable!("translate expects a Linked/RoutedJoin node, got {other:?}"),
    }
}

fn translate_linked(resolved: &NodeRef, refs: &[String], ctx: &mut Ctx) -> Result<Builder> {
    let inner = match &resolved.kind {
        NodeKind::Resolved { inner, .. } => inner,
        other => unreachable!("expected Resolved node, got {other:?}"),
    };
    match &inner.kind {
        NodeKind::From(None) => Ok(from_nothing()),
        NodeKind::From(Some(name)) => from_table(name, refs, ctx),
        NodeKind::Where { tail, cond } => {
            let (b, tail_refs, _) = translate_node(tail, ctx)?;
            apply_where(b, cond, &tail_refs, ctx)
        }
        NodeKind::Select { tail, items } => {
            let (b, _, _) = translate_node(tail, ctx)?;
            apply_select(b, items, ctx)
        }
        NodeKind::Define { tail, items } => {
            let (b, _, _) = translate_node(tail, ctx)?;
            apply_define(b, items, ctx)
        }
        NodeKind::Join {
            tail,
            joinee,
            on,
            left,
            right,
            lateral,
            ..
        } => {
            let (b, tail_refs, _) = translate_node(tail, ctx)?;
            apply_join(b, joinee, on, *left, *right, *lateral, &tail_refs, ctx)
        }
        NodeKind::Append { tail, others } => apply_append(tail, others, ctx),
        NodeKind::Iterate { tail, iterator } => apply_iterate(tail, iterator, ctx),
        NodeKind::With { tail, args, materialized } => apply_with(tail, args, *materialized, ctx),
        NodeKind::WithExternal { tail, args, handler } => apply_with_external(tail, args, handler, ctx),
        NodeKind::Bind { tail, args } => apply_bind(tail, args, ctx),
        NodeKind::Group { tail, keys } => {
            let (b, tail_refs, _) = translate_node(tail, ctx)?;
            apply_group(b, keys, &tail_refs, ctx)
        }
        NodeKind::Partition { tail, keys, order_by, frame } => {
            let (b, tail_refs, _) = translate_node(tail, ctx)?;
            apply_partition(b, keys, order_by, frame, &tail_refs, ctx)
        }
        NodeKind::Order { tail, by } => {
            let (b, tail_refs, _) = translate_node(tail, ctx)?;
            apply_order(b, by, &tail_refs, ctx)
        }
        NodeKind::Limit { tail, offset, count, with_ties } => {
            let (b, tail_refs, _) = translate_node(tail, ctx)?;
            apply_limit(b, *offset, *count, *with_ties, &tail_refs, ctx)
        }
        NodeKind::As { tail, .. } => {
            let (b, _, _) = translate_node(tail, ctx)?;
            Ok(b)
        }
        other => Err(Error::new(Reason::Simple(format!("{other:?} is not a translatable pipeline node"))).into()),
    }
}

// ---- Leaf builders ----------------------------------------------------------

fn from_nothing() -> Builder {
    Builder {
        select: Select { from: From::Nothing, ..Default::default() },
        base: "sub".into(),
        ..Default::default()
    }
}

fn from_table(name: &str, refs: &[String], ctx: &mut Ctx) -> Result<Builder> {
    let sql_name = resolve_from_name(name, ctx)?;
    let alias = fresh_alias(ctx, name);
    let mut columns = IndexMap::new();
    for col in refs {
        columns.insert(col.clone(), Expr::qualified(alias.clone(), col.clone()));
    }
    Ok(Builder {
        select: Select {
            from: From::Table { name: sql_name, alias },
            ..Default::default()
        },
        columns,
        base: name.to_string(),
        ..Default::default()
    })
}

// ---- Slot machinery ----------------------------------------------------------

fn ensure_slot(ctx: &mut Ctx, b: Builder, tail_refs: &[String], target_slot: u8, accretable: bool) -> Builder {
    let conflict = b.cursor > target_slot || (!accretable && b.cursor == target_slot);
    if conflict {
        close(ctx, b, tail_refs)
    } else {
        b
    }
}

fn close(ctx: &mut Ctx, b: Builder, refs: &[String]) -> Builder {
    let base = b.base.clone();
    let select = finalize(b, refs);
    wrap_query_as_builder(ctx, Query::Select(Box::new(select)), refs, &base)
}

/// Wraps `query` as a `FROM` subquery, allocating its alias from `base`,
/// the name of the source it closes over, so a table forced into a nested
/// SELECT keeps counting off its own name (`person` -> `person_2`) rather
/// than a generic one shared across unrelated subqueries.
fn wrap_query_as_builder(ctx: &mut Ctx, query: Query, refs: &[String], base: &str) -> Builder {
    let alias = fresh_alias(ctx, base);
    let mut columns = IndexMap::new();
    for name in refs {
        columns.insert(name.clone(), Expr::qualified(alias.clone(), name.clone()));
    }
    Builder {
        select: Select {
            from: From::Subquery { query: Box::new(query), alias },
            ..Default::default()
        },
        columns,
        base: base.to_string(),
        ..Default::default()
    }
}

/// Builds the final projection for a closing (or root) [Builder]. An
/// explicit `Select` already populated `select.projection`; otherwise the
/// auto-projection is `refs` (the parent's actual reference order, falling
/// back to declaration order when `refs` is empty — e.g. the crate root).
fn finalize(b: Builder, refs: &[String]) -> Select {
    let mut select = b.select;
    if !b.explicit_projection {
        let order: Vec<String> = if !refs.is_empty() {
            refs.to_vec()
        } else {
            b.columns.keys().cloned().collect()
        };
        let mut projection = Vec::with_capacity(order.len());
        for label in &order {
            if let Some(expr) = b.columns.get(label) {
                projection.push(project_item(label, expr));
            }
        }
        if projection.is_empty() {
            projection.push(Expr::Lit(Literal::Integer(1)));
        }
        select.projection = projection;
    }
    select
}

fn project_item(label: &str, expr: &Expr) -> Expr {
    match expr {
        Expr::Id { name, .. } if name == label => expr.clone(),
        _ => Expr::As { inner: Box::new(expr.clone()), name: label.to_string() },
    }
}

fn expr_label(expr: &Expr) -> Option<String> {
    match expr {
        Expr::As { name, .. } => Some(name.clone()),
        Expr::Id { name, .. } => Some(name.clone()),
        _ => None,
    }
}

fn and_combine(existing: Option<Expr>, new: Expr) -> Expr {
    match existing {
        Some(e) => Expr::Op { name: "and".into(), args: vec![e, new] },
        None => new,
    }
}

/// A joinee builder that's nothing more than a bare table reference can be
/// inlined straight into the `JOIN` clause instead of wrapped as a subquery.
fn trivial_from(b: &Builder) -> Option<From> {
    if b.cursor == 0 && !b.explicit_projection && b.select.joins.is_empty() && matches!(b.select.from, From::Table { .. }) {
        Some(b.select.from.clone())
    } else {
        None
    }
}

// ---- Per-operation appliers ---------------------------------------------

fn apply_where(mut b: Builder, cond: &NodeRef, tail_refs: &[String], ctx: &mut Ctx) -> Result<Builder> {
    let target_slot = if b.has_group { S_HAVING } else { S_WHERE };
    b = ensure_slot(ctx, b, tail_refs, target_slot, true);
    let target_slot = if b.has_group { S_HAVING } else { S_WHERE };
    let expr = translate_scalar(cond, &current_scope(&b), ctx)?;
    if target_slot == S_HAVING {
        let having = b.select.having.take();
        b.select.having = Some(and_combine(having, expr));
    } else {
        let where_ = b.select.where_.take();
        b.select.where_ = Some(and_combine(where_, expr));
    }
    b.cursor = b.cursor.max(target_slot);
    Ok(b)
}

fn apply_select(b: Builder, items: &[NodeRef], ctx: &mut Ctx) -> Result<Builder> {
    let scope = current_scope(&b);
    let mut projection = Vec::with_capacity(items.len());
    let mut columns = IndexMap::new();
    for item in items {
        let label = item_label(item)?;
        let expr = translate_scalar(item, &scope, ctx)?;
        projection.push(project_item(&label, &expr));
        columns.insert(label, expr);
    }
    drop(scope);
    Ok(Builder {
        select: Select { projection, ..b.select },
        columns,
        nested: IndexMap::new(),
        cursor: b.cursor,
        has_group: b.has_group,
        explicit_projection: true,
        agg_scope: b.agg_scope,
        active_window: b.active_window,
        base: b.base,
    })
}

fn apply_define(mut b: Builder, items: &[NodeRef], ctx: &mut Ctx) -> Result<Builder> {
    for item in items {
        let label = item_label(item)?;
        let expr = translate_scalar(item, &current_scope(&b), ctx)?;
        b.columns.insert(label.clone(), expr.clone());
        if b.explicit_projection {
            let proj_item = project_item(&label, &expr);
            if let Some(pos) = b.select.projection.iter().position(|p| expr_label(p).as_deref() == Some(label.as_str())) {
                b.select.projection[pos] = proj_item;
            } else {
                b.select.projection.push(proj_item);
            }
        }
    }
    Ok(b)
}

fn apply_join(
    mut b: Builder,
    joinee: &NodeRef,
    on: &NodeRef,
    left: bool,
    right: bool,
    lateral: bool,
    tail_refs: &[String],
    ctx: &mut Ctx,
) -> Result<Builder> {
    b = ensure_slot(ctx, b, tail_refs, S_JOIN, true);
    let (joinee_builder, joinee_refs, as_label) = translate_node(joinee, ctx)?;
    let (from_clause, join_columns, join_nested) = if let Some(simple) = trivial_from(&joinee_builder) {
        (simple, joinee_builder.columns, joinee_builder.nested)
    } else {
        let base = joinee_builder.base.clone();
        let alias = fresh_alias(ctx, &base);
        let query = Query::Select(Box::new(finalize(joinee_builder, &joinee_refs)));
        let mut cols = IndexMap::new();
        for name in &joinee_refs {
            cols.insert(name.clone(), Expr::qualified(alias.clone(), name.clone()));
        }
        (From::Subquery { query: Box::new(query), alias }, cols, IndexMap::new())
    };
    if let Some(label) = as_label {
        b.nested.insert(label, join_columns);
    } else {
        for (k, v) in join_columns {
            b.columns.entry(k).or_insert(v);
        }
        for (k, v) in join_nested {
            b.nested.entry(k).or_insert(v);
        }
    }
    let on_expr = translate_scalar(on, &current_scope(&b), ctx)?;
    let (kind, on_opt) = if matches!(on_expr, Expr::Lit(Literal::Boolean(true))) {
        (JoinKind::Cross, None)
    } else {
        let kind = match (left, right) {
            (true, true) => JoinKind::Full,
            (true, false) => JoinKind::Left,
            (false, true) => JoinKind::Right,
            (false, false) => JoinKind::Inner,
        };
        (kind, Some(on_expr))
    };
    b.select.joins.push(Join { kind, lateral, from: from_clause, on: on_opt });
    b.cursor = b.cursor.max(S_JOIN);
    Ok(b)
}

fn apply_append(tail: &NodeRef, others: &[NodeRef], ctx: &mut Ctx) -> Result<Builder> {
    let (b, tail_refs, _) = translate_node(tail, ctx)?;
    let base = b.base.clone();
    let tail_query = Query::Select(Box::new(finalize(b, &tail_refs)));
    let mut branches = vec![tail_query];
    for other in others {
        let (ob, orefs, _) = translate_node(other, ctx)?;
        branches.push(Query::Select(Box::new(finalize(ob, &orefs))));
    }
    let query = Query::SetOp { op: SetOp::UnionAll, branches };
    Ok(wrap_query_as_builder(ctx, query, &tail_refs, &base))
}

fn apply_iterate(tail: &NodeRef, iterator: &NodeRef, ctx: &mut Ctx) -> Result<Builder> {
    let (seed_b, seed_refs, _) = translate_node(tail, ctx)?;
    let seed_query = Query::Select(Box::new(finalize(seed_b, &seed_refs)));
    // Mirrors the resolver: the self-reference name is the iterator's own
    // label, not the seed's (see resolver::resolve's Iterate case).
    let label = inner_node(iterator).default_label().unwrap_or_else(|| "_iter".to_string());
    let cte_name = fresh_alias(ctx, &label);
    // Claim the outer read's alias now, off the same per-label counter, so
    // it lands at "<label>_2" no matter how many times the body below
    // references the CTE by name for its own self-join.
    let alias = fresh_alias(ctx, &label);
    ctx.scope.push((label.clone(), cte_name.clone()));
    let (iter_b, iter_refs, _) = translate_node(iterator, ctx)?;
    let iter_query = Query::Select(Box::new(finalize(iter_b, &iter_refs)));
    ctx.scope.pop();
    ctx.ctes.push(Cte {
        name: cte_name.clone(),
        columns: seed_refs.clone(),
        query: Box::new(Query::SetOp { op: SetOp::UnionAll, branches: vec![seed_query, iter_query] }),
        materialized: false,
        recursive: true,
    });
    let mut columns = IndexMap::new();
    for name in &seed_refs {
        columns.insert(name.clone(), Expr::qualified(alias.clone(), name.clone()));
    }
    Ok(Builder {
        select: Select { from: From::Table { name: cte_name, alias }, ..Default::default() },
        columns,
        base: label,
        ..Default::default()
    })
}

fn apply_with(tail: &NodeRef, args: &[NodeRef], materialized: bool, ctx: &mut Ctx) -> Result<Builder> {
    for arg in args {
        let label = item_label(arg)?;
        let (arg_b, arg_refs, _) = translate_node(arg, ctx)?;
        let query = Query::Select(Box::new(finalize(arg_b, &arg_refs)));
        let cte_name = fresh_alias(ctx, &label);
        ctx.ctes.push(Cte {
            name: cte_name.clone(),
            columns: arg_refs,
            query: Box::new(query),
            materialized,
            recursive: false,
        });
        ctx.scope.push((label, cte_name));
    }
    let (b, _, _) = translate_node(tail, ctx)?;
    Ok(b)
}

/// `WithExternal` hands each argument's plain (annotation-stripped) IR to
/// `handler` for out-of-band materialization (e.g. `CREATE TEMP TABLE ... AS
/// ...`, executed by the caller's own driver) rather than emitting a SQL
/// `WITH`; the main query then just references the resulting real table by
/// the name `handler` was given.
fn apply_with_external(tail: &NodeRef, args: &[NodeRef], handler: &ExternalHandler, ctx: &mut Ctx) -> Result<Builder> {
    for arg in args {
        let label = item_label(arg)?;
        let temp_name = fresh_alias(ctx, &format!("{label}_tmp"));
        let plain = strip_annotations(arg);
        (handler.0)(&temp_name, &plain)?;
        ctx.scope.push((label, temp_name));
    }
    let (b, _, _) = translate_node(tail, ctx)?;
    Ok(b)
}

fn apply_bind(tail: &NodeRef, args: &[NodeRef], ctx: &mut Ctx) -> Result<Builder> {
    let empty_cols = IndexMap::new();
    let empty_nested = IndexMap::new();
    let empty_scope = Scope { columns: &empty_cols, nested: &empty_nested, agg: None, window: None };
    let mut frame = Vec::with_capacity(args.len());
    for arg in args {
        let label = item_label(arg)?;
        let expr = translate_scalar(arg, &empty_scope, ctx)?;
        frame.push((label, expr));
    }
    ctx.binds.push(frame);
    let result = translate_node(tail, ctx);
    ctx.binds.pop();
    let (b, _, _) = result?;
    Ok(b)
}

fn apply_group(mut b: Builder, keys: &[NodeRef], tail_refs: &[String], ctx: &mut Ctx) -> Result<Builder> {
    b = ensure_slot(ctx, b, tail_refs, S_GROUP, false);
    let pre_scope = current_scope(&b);
    let mut group_by = Vec::with_capacity(keys.len());
    let mut new_columns = IndexMap::new();
    for k in keys {
        let label = item_label(k)?;
        let expr = translate_scalar(k, &pre_scope, ctx)?;
        group_by.push(expr.clone());
        new_columns.insert(label, expr);
    }
    drop(pre_scope);
    b.agg_scope = Some((b.columns.clone(), b.nested.clone()));
    b.select.group_by = group_by;
    b.columns = new_columns;
    b.nested = IndexMap::new();
    b.has_group = true;
    b.cursor = b.cursor.max(S_GROUP);
    Ok(b)
}

fn apply_partition(
    mut b: Builder,
    keys: &[NodeRef],
    order_by: &[NodeRef],
    frame: &crate::ir::Frame,
    tail_refs: &[String],
    ctx: &mut Ctx,
) -> Result<Builder> {
    b = ensure_slot(ctx, b, tail_refs, S_WINDOW, true);
    let scope = current_scope(&b);
    let mut partition_by = Vec::with_capacity(keys.len());
    for k in keys {
        partition_by.push(translate_scalar(k, &scope, ctx)?);
    }
    let mut order = Vec::with_capacity(order_by.len());
    for o in order_by {
        order.push(translate_sort(o, &scope, ctx)?);
    }
    drop(scope);
    ctx.window_counter += 1;
    let window_name = format!("w{}", ctx.window_counter);
    b.select.windows.push(NamedWindow {
        name: window_name.clone(),
        spec: WindowSpec { partition_by, order_by: order, frame: Some(frame.clone()) },
    });
    b.agg_scope = Some((b.columns.clone(), b.nested.clone()));
    b.active_window = Some(window_name);
    b.cursor = b.cursor.max(S_WINDOW);
    Ok(b)
}

fn apply_order(mut b: Builder, by: &[NodeRef], tail_refs: &[String], ctx: &mut Ctx) -> Result<Builder> {
    b = ensure_slot(ctx, b, tail_refs, S_ORDER, true);
    let scope = current_scope(&b);
    let mut sorts = Vec::with_capacity(by.len());
    for item in by {
        sorts.push(translate_sort(item, &scope, ctx)?);
    }
    drop(scope);
    b.select.order_by.extend(sorts);
    b.cursor = b.cursor.max(S_ORDER);
    Ok(b)
}

fn apply_limit(mut b: Builder, offset: Option<i64>, count: Option<i64>, with_ties: bool, tail_refs: &[String], ctx: &mut Ctx) -> Result<Builder> {
    b = ensure_slot(ctx, b, tail_refs, S_LIMIT, false);
    b.select.limit = Some(Limit { offset, count, with_ties });
    b.cursor = b.cursor.max(S_LIMIT);
    Ok(b)
}

// ---- Scalar translation ---------------------------------------------------

fn translate_sort(node: &NodeRef, scope: &Scope, ctx: &mut Ctx) -> Result<Sort> {
    let plain = inner_node(node);
    if let NodeKind::Sort { value, order, nulls } = &plain.kind {
        Ok(Sort { value: translate_scalar(value, scope, ctx)?, order: *order, nulls: *nulls })
    } else {
        Ok(Sort { value: translate_scalar(node, scope, ctx)?, order: crate::ir::SortOrder::Asc, nulls: None })
    }
}

fn translate_get(name: &str, inner: &Option<NodeRef>, scope: &Scope) -> Result<Expr> {
    match inner {
        None => scope
            .columns
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(Reason::CannotFind { name: name.to_string() }).into()),
        Some(base) => {
            let base_name = match &inner_node(base).kind {
                NodeKind::Get { name, inner: None } => name.clone(),
                _ => {
                    return Err(Error::new(Reason::OrphanReference { name: name.to_string() })
                        .with_help("nested column lookups are only supported one level deep")
                        .into())
                }
            };
            let record = scope
                .nested
                .get(&base_name)
                .ok_or_else(|| Error::new(Reason::OrphanReference { name: base_name.clone() }))?;
            record
                .get(name)
                .cloned()
                .ok_or_else(|| Error::new(Reason::CannotFind { name: name.to_string() }).into())
        }
    }
}

/// Operators rendered infix by the serializer; anything else is a plain
/// `NAME(args...)` function call.
const OPERATORS: &[&str] = &["=", "<>", "<", "<=", ">", ">=", "+", "-", "*", "/", "and", "or"];

fn translate_scalar(node: &NodeRef, scope: &Scope, ctx: &mut Ctx) -> Result<Expr> {
    if let NodeKind::Linked { .. } = &node.kind {
        let (b, refs, _) = translate_node(node, ctx)?;
        let select = finalize(b, &refs);
        return Ok(Expr::Subquery(Box::new(Query::Select(Box::new(select)))));
    }
    let inner = match &node.kind {
        NodeKind::Resolved { inner, .. } => inner,
        other => unreachable!("expected a Resolved scalar node, got {other:?}"),
    };
    match &inner.kind {
        NodeKind::Lit(l) => Ok(Expr::Lit(l.clone())),
        NodeKind::Get { name, inner: gi } => translate_get(name, gi, scope),
        NodeKind::Var(name) => Ok(Expr::Param(name.clone())),
        NodeKind::BoundVariable { name, depth } => ctx.lookup_bind(*depth, name),
        NodeKind::Fun { name, args } if name == "case" => {
            // `case` has no dedicated Semantic node; it's surface sugar for
            // a flat arg list
            // `[cond1, val1, cond2, val2, ..., else?]` that the translator
            // reshapes into the Syntactic IR's dedicated `Case` clause.
            let targs = args.iter().map(|a| translate_scalar(a, scope, ctx)).collect::<Result<Vec<_>>>()?;
            let has_else = targs.len() % 2 == 1;
            let else_ = if has_else { targs.last().cloned().map(Box::new) } else { None };
            let pairs = if has_else { &targs[..targs.len() - 1] } else { &targs[..] };
            let branches = pairs.chunks_exact(2).map(|c| (c[0].clone(), c[1].clone())).collect();
            Ok(Expr::Case { branches, else_ })
        }
        NodeKind::Fun { name, args } => {
            let targs = args.iter().map(|a| translate_scalar(a, scope, ctx)).collect::<Result<Vec<_>>>()?;
            if OPERATORS.contains(&name.as_str()) {
                Ok(Expr::Op { name: name.clone(), args: targs })
            } else if name == "not" {
                Ok(Expr::Op { name: "not".into(), args: targs })
            } else {
                Ok(Expr::Fun { name: name.clone(), args: targs, template: None })
            }
        }
        NodeKind::Agg { name, args, filter } => {
            let (acols, anested) = scope.agg.unwrap_or((scope.columns, scope.nested));
            let agg_scope = Scope { columns: acols, nested: anested, agg: None, window: None };
            let targs = args.iter().map(|a| translate_scalar(a, &agg_scope, ctx)).collect::<Result<Vec<_>>>()?;
            let tfilter = filter.as_ref().map(|f| translate_scalar(f, &agg_scope, ctx)).transpose()?.map(Box::new);
            let over = scope.window.map(|w| OverClause::Named(w.to_string()));
            Ok(Expr::Agg { name: name.clone(), args: targs, filter: tfilter, over })
        }
        NodeKind::Sort { value, order, nulls } => Ok(Expr::Sort(Box::new(Sort {
            value: translate_scalar(value, scope, ctx)?,
            order: *order,
            nulls: *nulls,
        }))),
        other => Err(Error::new(Reason::Simple(format!("{other:?} is not a translatable scalar node"))).into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::{Catalog, Table};
    use crate::dialect::Dialect;
    use crate::ir::build::*;

    fn catalog() -> Catalog {
        Catalog::new(
            [
                Table::new("person", ["person_id", "year_of_birth", "gender_concept_id", "location_id"]).unwrap(),
                Table::new("location", ["location_id", "state"]).unwrap(),
            ],
            Dialect::sqlite(),
        )
        .unwrap()
    }

    fn build(q: Expr, cat: &Catalog) -> Query {
        let resolved = crate::resolver::resolve(q.node(), cat).unwrap();
        let linked = crate::linker::link(&resolved).unwrap();
        translate(&linked, cat).unwrap()
    }

    #[test]
    fn simple_select_from_table() {
        let cat = catalog();
        let q = select(from("person"), [get("person_id"), get("year_of_birth")]).unwrap();
        let query = build(q, &cat);
        match query {
            Query::Select(s) => {
                assert!(matches!(s.from, From::Table { ref name, .. } if name == "person"));
                assert_eq!(s.projection.len(), 2);
            }
            _ => panic!("expected a plain SELECT"),
        }
    }

    #[test]
    fn where_after_order_closes_into_subquery() {
        let cat = catalog();
        let q = r#where(
            order(from("person"), [get("year_of_birth").desc()]),
            get("gender_concept_id").eq(1i64),
        );
        let q = select(q, get("person_id")).unwrap();
        let query = build(q, &cat);
        match query {
            Query::Select(s) => {
                assert!(s.where_.is_some());
                assert!(matches!(s.from, From::Subquery { .. }));
            }
            _ => panic!("expected a plain SELECT"),
        }
    }

    #[test]
    fn group_then_define_stays_in_one_select() {
        let cat = catalog();
        let grouped = group(from("person"), get("gender_concept_id")).unwrap();
        let q = define(grouped, ("n", count_star())).unwrap();
        let query = build(q, &cat);
        match query {
            Query::Select(s) => {
                assert_eq!(s.group_by.len(), 1);
                assert!(matches!(s.from, From::Table { .. }));
            }
            _ => panic!("expected a plain SELECT"),
        }
    }

    fn count_star() -> Expr {
        agg("count", [lit(1i64)]).unwrap()
    }
}

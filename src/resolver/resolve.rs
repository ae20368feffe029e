//! Name resolution and row-type assignment, bottom-up in post-order.
//!
//! Two mutually recursive halves: [resolve_pipeline] walks pipeline nodes
//! (each carrying a *tail*) and produces a `Resolved { inner, ty }` wrapper
//! around a freshly rebuilt node; [resolve_scalar] walks scalar expressions
//! against the row type of whatever input they were resolved in, and
//! produces the same wrapper with `ty = RowType::Scalar(field_type)`.

use std::rc::Rc;

use crate::catalog::Catalog;
use crate::error::{Error, Reason, Result};
use crate::ir::build::check_unique_labels;
use crate::ir::{Node, NodeKind, NodeRef};

use super::scope::Scope;
use super::types::{empty_row, unit_row, FieldType, Row, RowType};

/// Resolve a user-built pipeline against a catalog. The returned node is the
/// root, wrapped in `Resolved`.
pub fn resolve(node: NodeRef, catalog: &Catalog) -> Result<NodeRef> {
    let scope = Scope::default();
    let (resolved, _ty) = resolve_pipeline(&scope, &node, catalog)?;
    Ok(resolved)
}

fn wrap(kind: NodeKind, label: Option<String>, ty: RowType) -> NodeRef {
    let inner = Rc::new(Node { kind, label });
    Node::new(NodeKind::Resolved { inner, ty })
}

/// A nested row's field type, for `As` and the `From(name)` lookup of a
/// `With`/`Bind` target: collapses whatever `RowType` the tail produced into
/// the `FieldType` a parent row stores it under.
fn nest(ty: &RowType) -> FieldType {
    match ty {
        RowType::Row(row) => FieldType::Row(row.clone()),
        RowType::Empty => FieldType::Row(empty_row()),
        RowType::Group {
            keys,
            aggregate_scope,
        } => FieldType::GroupRow {
            keys: Box::new(keys.clone()),
            aggregate_scope: Box::new(aggregate_scope.clone()),
        },
        RowType::Scalar(field) => field.clone(),
    }
}

fn merge_rows(left: &Row, right: &Row) -> Row {
    let mut out = left.clone();
    for (name, field) in right {
        match out.get(name) {
            None => {
                out.insert(name.clone(), field.clone());
            }
            Some(existing) => {
                let mut sources: std::collections::BTreeSet<String> = match existing {
                    FieldType::Ambiguous(s) => s.clone(),
                    _ => ["left".to_string()].into_iter().collect(),
                };
                sources.insert("right".to_string());
                out.insert(name.clone(), FieldType::Ambiguous(sources));
            }
        }
    }
    out
}

fn resolve_pipeline(scope: &Scope, node: &NodeRef, catalog: &Catalog) -> Result<(NodeRef, RowType)> {
    let label = node.label.clone();
    match &node.kind {
        NodeKind::From(None) => {
            let ty = RowType::Row(unit_row());
            Ok((wrap(NodeKind::From(None), label, ty.clone()), ty))
        }
        NodeKind::From(Some(name)) => {
            // A `With`/`Iterate`-introduced name shadows the catalog: check
            // the scope before falling back to a real table lookup.
            let row = match scope.lookup_table(name) {
                Some(row) => row.clone(),
                None => {
                    let table = catalog.lookup(name)?;
                    let mut row = empty_row();
                    for column in &table.columns {
                        row.insert(column.clone(), FieldType::Scalar);
                    }
                    row
                }
            };
            let ty = RowType::Row(row);
            Ok((
                wrap(NodeKind::From(Some(name.clone())), label, ty.clone()),
                ty,
            ))
        }
        NodeKind::Where { tail, cond } => {
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let (cond_r, _) = resolve_scalar(scope, &tail_ty, cond, catalog)?;
            let ty = tail_ty;
            Ok((
                wrap(
                    NodeKind::Where {
                        tail: tail_r,
                        cond: cond_r,
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::Select { tail, items } => {
            check_unique_labels(items)?;
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let mut row = empty_row();
            let mut resolved_items = Vec::with_capacity(items.len());
            for item in items {
                let item_label = item.default_label().ok_or_else(|| {
                    Error::new(Reason::Simple(
                        "Select item has no label; wrap it in As(name)".into(),
                    ))
                })?;
                let (item_r, field_ty) = resolve_scalar(scope, &tail_ty, item, catalog)?;
                if row.insert(item_label.clone(), field_ty).is_some() {
                    return Err(Error::new(Reason::DuplicateLabel { name: item_label }).into());
                }
                resolved_items.push(item_r);
            }
            let ty = RowType::Row(row);
            Ok((
                wrap(
                    NodeKind::Select {
                        tail: tail_r,
                        items: resolved_items,
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::Define { tail, items } => {
            check_unique_labels(items)?;
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let mut row = tail_ty.as_row().cloned().unwrap_or_else(empty_row);
            let mut resolved_items = Vec::with_capacity(items.len());
            for item in items {
                let item_label = item.default_label().ok_or_else(|| {
                    Error::new(Reason::Simple(
                        "Define item has no label; wrap it in As(name)".into(),
                    ))
                })?;
                let (item_r, field_ty) = resolve_scalar(scope, &tail_ty, item, catalog)?;
                row.insert(item_label, field_ty);
                resolved_items.push(item_r);
            }
            let ty = RowType::Row(row);
            Ok((
                wrap(
                    NodeKind::Define {
                        tail: tail_r,
                        items: resolved_items,
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::Join {
            tail,
            joinee,
            on,
            left,
            right,
            optional,
            lateral,
        } => {
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let (joinee_r, joinee_ty) = resolve_pipeline(scope, joinee, catalog)?;
            let tail_row = tail_ty.as_row().cloned().unwrap_or_else(empty_row);
            let joinee_row = joinee_ty.as_row().cloned().unwrap_or_else(empty_row);
            let merged = merge_rows(&tail_row, &joinee_row);
            let merged_ty = RowType::Row(merged.clone());
            let (on_r, _) = resolve_scalar(scope, &RowType::Row(merged), on, catalog)?;
            Ok((
                wrap(
                    NodeKind::Join {
                        tail: tail_r,
                        joinee: joinee_r,
                        on: on_r,
                        left: *left,
                        right: *right,
                        optional: *optional,
                        lateral: *lateral,
                    },
                    label,
                    merged_ty.clone(),
                ),
                merged_ty,
            ))
        }
        NodeKind::Append { tail, others } => {
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let tail_row = tail_ty.as_row().cloned().unwrap_or_else(empty_row);
            let mut resolved_others = Vec::with_capacity(others.len());
            let mut shared: indexmap::IndexSet<String> = tail_row.keys().cloned().collect();
            let mut field_types = tail_row.clone();
            for other in others {
                let (other_r, other_ty) = resolve_pipeline(scope, other, catalog)?;
                let other_row = other_ty.as_row().cloned().unwrap_or_else(empty_row);
                shared.retain(|name| other_row.contains_key(name));
                for (name, field) in &other_row {
                    if shared.contains(name) {
                        let merged = match (field_types.get(name), field) {
                            (Some(a), b) if a == b => a.clone(),
                            _ => FieldType::Scalar,
                        };
                        field_types.insert(name.clone(), merged);
                    }
                }
                resolved_others.push(other_r);
            }
            let mut row = empty_row();
            for name in tail_row.keys() {
                if shared.contains(name) {
                    row.insert(name.clone(), field_types[name].clone());
                }
            }
            let ty = RowType::Row(row);
            Ok((
                wrap(
                    NodeKind::Append {
                        tail: tail_r,
                        others: resolved_others,
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::Iterate { tail, iterator } => {
            let (seed_r, seed_ty) = resolve_pipeline(scope, tail, catalog)?;
            // The self-reference name the iterator body uses to look up the
            // previous iteration's row is the iterator's own label (from a
            // trailing `As`), not the seed's — the seed is typically
            // unlabeled, while the iterator ends `... |> As("factorial")`
            // and its body opens with `From("factorial")`.
            let iter_label = iterator.default_label().unwrap_or_else(|| "_iter".to_string());
            let seed_row = seed_ty.as_row().cloned().unwrap_or_else(empty_row);
            let iter_scope = scope.with_table(iter_label.clone(), seed_row.clone());
            let (iterator_r, iterator_ty) = resolve_pipeline(&iter_scope, iterator, catalog)?;
            // A trailing `As(iter_label)` nests the iterator's row under that
            // one key (see the `As` case below); unwrap it before comparing
            // against the seed's flat row, or every recursive pipeline would
            // fail the shape check regardless of actually matching.
            let iterator_row = match iterator_ty.as_row() {
                Some(r) if r.len() == 1 => match r.get(iter_label.as_str()) {
                    Some(FieldType::Row(inner)) => inner.clone(),
                    _ => r.clone(),
                },
                Some(r) => r.clone(),
                None => empty_row(),
            };
            if iterator_row != seed_row {
                return Err(Error::new(Reason::RecursionShapeError).into());
            }
            let ty = seed_ty;
            Ok((
                wrap(
                    NodeKind::Iterate {
                        tail: seed_r,
                        iterator: iterator_r,
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::With {
            tail,
            args,
            materialized,
        } => {
            check_unique_labels(args)?;
            let mut inner_scope = scope.clone();
            let mut resolved_args = Vec::with_capacity(args.len());
            for arg in args {
                let arg_label = arg
                    .default_label()
                    .ok_or_else(|| Error::new(Reason::Simple("With arg has no label".into())))?;
                let (arg_r, arg_ty) = resolve_pipeline(scope, arg, catalog)?;
                let arg_row = arg_ty.as_row().cloned().unwrap_or_else(empty_row);
                inner_scope = inner_scope.with_table(arg_label, arg_row);
                resolved_args.push(arg_r);
            }
            let (tail_r, tail_ty) = resolve_pipeline(&inner_scope, tail, catalog)?;
            let ty = tail_ty;
            Ok((
                wrap(
                    NodeKind::With {
                        tail: tail_r,
                        args: resolved_args,
                        materialized: *materialized,
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::WithExternal {
            tail,
            args,
            handler,
        } => {
            check_unique_labels(args)?;
            let mut inner_scope = scope.clone();
            let mut resolved_args = Vec::with_capacity(args.len());
            for arg in args {
                let arg_label = arg.default_label().ok_or_else(|| {
                    Error::new(Reason::Simple("WithExternal arg has no label".into()))
                })?;
                let (arg_r, arg_ty) = resolve_pipeline(scope, arg, catalog)?;
                let arg_row = arg_ty.as_row().cloned().unwrap_or_else(empty_row);
                inner_scope = inner_scope.with_table(arg_label, arg_row);
                resolved_args.push(arg_r);
            }
            let (tail_r, tail_ty) = resolve_pipeline(&inner_scope, tail, catalog)?;
            let ty = tail_ty;
            Ok((
                wrap(
                    NodeKind::WithExternal {
                        tail: tail_r,
                        args: resolved_args,
                        handler: handler.clone(),
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::Bind { tail, args } => {
            check_unique_labels(args)?;
            let mut bind_frame = Vec::with_capacity(args.len());
            for arg in args {
                let arg_label = arg
                    .default_label()
                    .ok_or_else(|| Error::new(Reason::Simple("Bind arg has no label".into())))?;
                let (arg_r, _) = resolve_scalar(scope, &RowType::Empty, arg, catalog)?;
                bind_frame.push((arg_label, arg_r));
            }
            let inner_scope = scope.with_bind_frame(bind_frame.clone());
            let (tail_r, tail_ty) = resolve_pipeline(&inner_scope, tail, catalog)?;
            let ty = tail_ty;
            Ok((
                wrap(
                    NodeKind::Bind {
                        tail: tail_r,
                        args: bind_frame.into_iter().map(|(_, n)| n).collect(),
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::Group { tail, keys } => {
            check_unique_labels(keys)?;
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let mut keys_row = empty_row();
            let mut resolved_keys = Vec::with_capacity(keys.len());
            for key in keys {
                let key_label = key
                    .default_label()
                    .ok_or_else(|| Error::new(Reason::Simple("Group key has no label".into())))?;
                let (key_r, field_ty) = resolve_scalar(scope, &tail_ty, key, catalog)?;
                keys_row.insert(key_label, field_ty);
                resolved_keys.push(key_r);
            }
            let aggregate_scope = tail_ty.as_row().cloned().unwrap_or_else(empty_row);
            let ty = RowType::Group {
                keys: keys_row,
                aggregate_scope,
            };
            Ok((
                wrap(
                    NodeKind::Group {
                        tail: tail_r,
                        keys: resolved_keys,
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::Partition {
            tail,
            keys,
            order_by,
            frame,
        } => {
            check_unique_labels(keys)?;
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let mut keys_row = empty_row();
            let mut resolved_keys = Vec::with_capacity(keys.len());
            for key in keys {
                let key_label = key.default_label().ok_or_else(|| {
                    Error::new(Reason::Simple("Partition key has no label".into()))
                })?;
                let (key_r, field_ty) = resolve_scalar(scope, &tail_ty, key, catalog)?;
                keys_row.insert(key_label, field_ty);
                resolved_keys.push(key_r);
            }
            let mut resolved_order = Vec::with_capacity(order_by.len());
            for o in order_by {
                let (o_r, _) = resolve_scalar(scope, &tail_ty, o, catalog)?;
                resolved_order.push(o_r);
            }
            let aggregate_scope = tail_ty.as_row().cloned().unwrap_or_else(empty_row);
            let mut row = tail_ty.as_row().cloned().unwrap_or_else(empty_row);
            row.insert(
                super::types::SCOPE_FIELD.to_string(),
                FieldType::GroupRow {
                    keys: Box::new(keys_row),
                    aggregate_scope: Box::new(aggregate_scope),
                },
            );
            let ty = RowType::Row(row);
            Ok((
                wrap(
                    NodeKind::Partition {
                        tail: tail_r,
                        keys: resolved_keys,
                        order_by: resolved_order,
                        frame: frame.clone(),
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::Order { tail, by } => {
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let mut resolved_by = Vec::with_capacity(by.len());
            for b in by {
                let (b_r, _) = resolve_scalar(scope, &tail_ty, b, catalog)?;
                resolved_by.push(b_r);
            }
            let ty = tail_ty;
            Ok((
                wrap(
                    NodeKind::Order {
                        tail: tail_r,
                        by: resolved_by,
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::Limit {
            tail,
            offset,
            count,
            with_ties,
        } => {
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let ty = tail_ty;
            Ok((
                wrap(
                    NodeKind::Limit {
                        tail: tail_r,
                        offset: *offset,
                        count: *count,
                        with_ties: *with_ties,
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        NodeKind::As { tail, name } => {
            let (tail_r, tail_ty) = resolve_pipeline(scope, tail, catalog)?;
            let mut row = empty_row();
            row.insert(name.clone(), nest(&tail_ty));
            let ty = RowType::Row(row);
            Ok((
                wrap(
                    NodeKind::As {
                        tail: tail_r,
                        name: name.clone(),
                    },
                    label,
                    ty.clone(),
                ),
                ty,
            ))
        }
        other => Err(Error::new(Reason::Simple(format!(
            "{other:?} is not a pipeline node and cannot be resolved as one"
        )))
        .into()),
    }
}

/// Resolve a scalar expression against `input`'s row type (and, for `Agg`,
/// its aggregate scope). Returns the resolved node and its field type.
fn resolve_scalar(
    scope: &Scope,
    input: &RowType,
    node: &NodeRef,
    catalog: &Catalog,
) -> Result<(NodeRef, FieldType)> {
    let label = node.label.clone();
    match &node.kind {
        NodeKind::Lit(lit) => {
            let field = FieldType::Scalar;
            Ok((
                wrap(NodeKind::Lit(lit.clone()), label, RowType::Scalar(field.clone())),
                field,
            ))
        }
        NodeKind::Get { name, inner } => {
            let (inner_r, row) = match inner {
                None => (None, input.as_row().cloned()),
                Some(inner_node) => {
                    let (inner_r, inner_field) = resolve_scalar(scope, input, inner_node, catalog)?;
                    let row = match inner_field {
                        FieldType::Row(r) => Some(r),
                        _ => {
                            return Err(Error::new(Reason::OrphanReference { name: name.clone() })
                                .with_path_segment(name.clone())
                                .into())
                        }
                    };
                    (Some(inner_r), row)
                }
            };
            let row = row.ok_or_else(|| Error::new(Reason::CannotFind { name: name.clone() }))?;
            let field = match row.get(name) {
                Some(FieldType::Ambiguous(_)) => {
                    return Err(Error::new(Reason::Ambiguous { name: name.clone() }).into())
                }
                Some(f) => f.clone(),
                None => return Err(Error::new(Reason::CannotFind { name: name.clone() }).into()),
            };
            Ok((
                wrap(
                    NodeKind::Get {
                        name: name.clone(),
                        inner: inner_r,
                    },
                    label,
                    RowType::Scalar(field.clone()),
                ),
                field,
            ))
        }
        NodeKind::Var(name) => match scope.lookup_var(name) {
            Some((depth, bound)) => {
                let field = field_type_of_resolved(bound);
                Ok((
                    wrap(
                        NodeKind::BoundVariable {
                            name: name.clone(),
                            depth,
                        },
                        label,
                        RowType::Scalar(field.clone()),
                    ),
                    field,
                ))
            }
            None => {
                let field = FieldType::Scalar;
                Ok((
                    wrap(
                        NodeKind::Var(name.clone()),
                        label,
                        RowType::Scalar(field.clone()),
                    ),
                    field,
                ))
            }
        },
        NodeKind::Fun { name, args } => {
            let mut resolved_args = Vec::with_capacity(args.len());
            for a in args {
                let (a_r, _) = resolve_scalar(scope, input, a, catalog)?;
                resolved_args.push(a_r);
            }
            let field = FieldType::Scalar;
            Ok((
                wrap(
                    NodeKind::Fun {
                        name: name.clone(),
                        args: resolved_args,
                    },
                    label,
                    RowType::Scalar(field.clone()),
                ),
                field,
            ))
        }
        NodeKind::Agg { name, args, filter } => {
            let aggregate_scope = input.aggregate_scope().cloned().ok_or_else(|| {
                Error::new(Reason::Simple(format!(
                    "aggregate function `{name}` used outside of a grouped or partitioned context"
                )))
            })?;
            let agg_input = RowType::Row(aggregate_scope);
            let mut resolved_args = Vec::with_capacity(args.len());
            for a in args {
                let (a_r, _) = resolve_scalar(scope, &agg_input, a, catalog)?;
                resolved_args.push(a_r);
            }
            let resolved_filter = filter
                .as_ref()
                .map(|f| resolve_scalar(scope, &agg_input, f, catalog))
                .transpose()?
                .map(|(n, _)| n);
            let field = FieldType::Scalar;
            Ok((
                wrap(
                    NodeKind::Agg {
                        name: name.clone(),
                        args: resolved_args,
                        filter: resolved_filter,
                    },
                    label,
                    RowType::Scalar(field.clone()),
                ),
                field,
            ))
        }
        NodeKind::Sort {
            value,
            order,
            nulls,
        } => {
            let (value_r, field) = resolve_scalar(scope, input, value, catalog)?;
            Ok((
                wrap(
                    NodeKind::Sort {
                        value: value_r,
                        order: *order,
                        nulls: *nulls,
                    },
                    label,
                    RowType::Scalar(field.clone()),
                ),
                field,
            ))
        }
        // A scalar position may itself be a correlated subquery (e.g. `Fun("in", x, From(...)
        // |> Select(...))`), which resolves as an ordinary pipeline and contributes its
        // single-column row type as the scalar's field type.
        NodeKind::From(_)
        | NodeKind::Where { .. }
        | NodeKind::Select { .. }
        | NodeKind::Define { .. }
        | NodeKind::Join { .. }
        | NodeKind::Append { .. }
        | NodeKind::Iterate { .. }
        | NodeKind::With { .. }
        | NodeKind::WithExternal { .. }
        | NodeKind::Bind { .. }
        | NodeKind::Group { .. }
        | NodeKind::Partition { .. }
        | NodeKind::Order { .. }
        | NodeKind::Limit { .. }
        | NodeKind::As { .. } => {
            let (resolved, ty) = resolve_pipeline(scope, node, catalog)?;
            Ok((resolved, nest(&ty)))
        }
        other => Err(Error::new(Reason::Simple(format!(
            "{other:?} cannot appear in scalar position"
        )))
        .into()),
    }
}

fn field_type_of_resolved(node: &NodeRef) -> FieldType {
    match &node.kind {
        NodeKind::Resolved { ty, .. } => match ty {
            RowType::Scalar(f) => f.clone(),
            other => nest(other),
        },
        _ => FieldType::Scalar,
    }
}


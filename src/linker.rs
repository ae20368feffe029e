//! Linker (C5): propagates the set of externally-needed output references
//! backward from the root and records the result as `Linked { refs,
//! n_ext_refs }` wrappers around every pipeline node's `Resolved` form.
//!
//! This drives three optimizations and one correctness guarantee: unused
//! columns are never projected by an intermediate SELECT;
//! `optional` joins whose joinee contributes no referenced column are
//! pruned (recorded as `RoutedJoin { keep: false }`); unreferenced `With`
//! siblings are dropped; and every SELECT the translator later emits
//! projects exactly the columns its parent actually references.
//!
//! The pass is a single top-down recursion mirroring the resolver's
//! bottom-up one: `link_pipeline` walks pipeline nodes carrying a `needed`
//! set of column names computed from the parent; `link_scalar` walks
//! expressions, rewriting any embedded pipeline (a correlated subquery used
//! in scalar position) through `link_pipeline` in its own right.

use std::rc::Rc;

use indexmap::IndexSet;

use crate::error::Result;
use crate::ir::fold::{fold_node, NodeFold};
use crate::ir::{Node, NodeKind, NodeRef};
use crate::resolver::types::{FieldType, Row, RowType, SCOPE_FIELD};

pub fn link(node: &NodeRef) -> Result<NodeRef> {
    let needed = row_fields_in_order(resolved_ty(node));
    link_pipeline(node, &needed)
}

fn resolved_ty(node: &NodeRef) -> &RowType {
    match &node.kind {
        NodeKind::Resolved { ty, .. } => ty,
        other => unreachable!("linker expects a Resolved node, got {other:?}"),
    }
}

fn resolved_inner(node: &NodeRef) -> &NodeRef {
    match &node.kind {
        NodeKind::Resolved { inner, .. } => inner,
        other => unreachable!("linker expects a Resolved node, got {other:?}"),
    }
}

/// The column names a node's output row exposes, in declaration order.
/// `Group`'s own output is its key row; `Partition`'s hidden [SCOPE_FIELD]
/// is never itself a user-referenceable column.
fn row_fields_in_order(ty: &RowType) -> IndexSet<String> {
    let row: Option<&Row> = match ty {
        RowType::Row(r) => Some(r),
        RowType::Group { keys, .. } => Some(keys),
        RowType::Empty | RowType::Scalar(_) => None,
    };
    row.map(|r| r.keys().filter(|k| k.as_str() != SCOPE_FIELD).cloned().collect())
        .unwrap_or_default()
}

fn is_pipeline_kind(kind: &NodeKind) -> bool {
    use NodeKind::*;
    matches!(
        kind,
        From(_)
            | Where { .. }
            | Select { .. }
            | Define { .. }
            | Join { .. }
            | Append { .. }
            | Iterate { .. }
            | With { .. }
            | WithExternal { .. }
            | Bind { .. }
            | Group { .. }
            | Partition { .. }
            | Order { .. }
            | Limit { .. }
            | As { .. }
    )
}

/// Column names directly referenced by a scalar expression, against
/// whatever row it was resolved against. A chained `Get` (`x.get("y")`)
/// contributes the *base* name (`x`), since that's the column the
/// surrounding tail must actually supply — the inner lookup happens inside
/// the nested record once `x` is in hand. A pipeline embedded in scalar
/// position (a correlated subquery) is opaque here; its own references are
/// resolved independently when [link_scalar] descends into it.
fn scalar_refs(node: &NodeRef) -> IndexSet<String> {
    let mut out = IndexSet::new();
    collect_scalar_refs(node, &mut out);
    out
}

fn collect_scalar_refs(node: &NodeRef, out: &mut IndexSet<String>) {
    match &node.kind {
        NodeKind::Resolved { inner, .. } => collect_scalar_refs(inner, out),
        NodeKind::Get { name, inner: None } => {
            out.insert(name.clone());
        }
        NodeKind::Get {
            inner: Some(base), ..
        } => collect_scalar_refs(base, out),
        NodeKind::Fun { args, .. } => {
            for a in args {
                collect_scalar_refs(a, out);
            }
        }
        NodeKind::Agg { args, filter, .. } => {
            for a in args {
                collect_scalar_refs(a, out);
            }
            if let Some(f) = filter {
                collect_scalar_refs(f, out);
            }
        }
        NodeKind::Sort { value, .. } => collect_scalar_refs(value, out),
        _ => {}
    }
}

/// Rewrites a scalar expression, threading any embedded pipeline (used as a
/// correlated subquery) through [link_pipeline] in its own right.
fn link_scalar(node: &NodeRef) -> Result<NodeRef> {
    let ty = resolved_ty(node).clone();
    let inner = resolved_inner(node).clone();
    let label = inner.label.clone();

    if is_pipeline_kind(&inner.kind) {
        return link_pipeline(node, &row_fields_in_order(&ty));
    }

    let new_kind = match &inner.kind {
        NodeKind::Get { name, inner: gi } => NodeKind::Get {
            name: name.clone(),
            inner: gi.as_ref().map(link_scalar).transpose()?,
        },
        NodeKind::Fun { name, args } => NodeKind::Fun {
            name: name.clone(),
            args: args.iter().map(link_scalar).collect::<Result<_>>()?,
        },
        NodeKind::Agg { name, args, filter } => NodeKind::Agg {
            name: name.clone(),
            args: args.iter().map(link_scalar).collect::<Result<_>>()?,
            filter: filter.as_ref().map(link_scalar).transpose()?,
        },
        NodeKind::Sort {
            value,
            order,
            nulls,
        } => NodeKind::Sort {
            value: link_scalar(value)?,
            order: *order,
            nulls: *nulls,
        },
        other => other.clone(),
    };
    let new_inner = Rc::new(Node {
        kind: new_kind,
        label,
    });
    Ok(Node::new(NodeKind::Resolved {
        inner: new_inner,
        ty,
    }))
}

/// Names reachable via `From(Some(name))` anywhere within `node`, used to
/// decide which `With` siblings are ever actually selected from.
fn used_with_names(node: &NodeRef) -> std::collections::HashSet<String> {
    struct Collect {
        found: std::collections::HashSet<String>,
    }
    impl NodeFold for Collect {
        fn fold_node(&mut self, node: NodeRef) -> Result<NodeRef> {
            let target = match &node.kind {
                NodeKind::Resolved { inner, .. } => inner,
                _ => &node,
            };
            if let NodeKind::From(Some(name)) = &target.kind {
                self.found.insert(name.clone());
            }
            fold_node(self, node)
        }
    }
    let mut collector = Collect {
        found: Default::default(),
    };
    // fold_node requires owning the Rc; cloning preserves the original.
    let _ = collector.fold_node(node.clone());
    collector.found
}

fn wrap_linked(kind: NodeKind, label: Option<String>, ty: RowType, needed: &IndexSet<String>) -> NodeRef {
    let refs: Vec<String> = row_fields_in_order(&ty)
        .into_iter()
        .filter(|f| needed.contains(f))
        .collect();
    let n_ext_refs = refs.len();
    let new_inner = Rc::new(Node { kind, label });
    let resolved = Node::new(NodeKind::Resolved {
        inner: new_inner,
        ty,
    });
    Node::new(NodeKind::Linked {
        inner: resolved,
        refs,
        n_ext_refs,
    })
}

fn link_pipeline(node: &NodeRef, needed: &IndexSet<String>) -> Result<NodeRef> {
    let ty = resolved_ty(node).clone();
    let inner = resolved_inner(node).clone();
    let label = inner.label.clone();

    // `Join` may short-circuit into a transparent `RoutedJoin`, which skips
    // the usual Resolved/Linked wrapping (the pruned tail is already linked).
    if let NodeKind::Join {
        tail,
        joinee,
        on,
        left,
        right,
        optional,
        lateral,
    } = &inner.kind
    {
        let joinee_fields = row_fields_in_order(resolved_ty(joinee));
        let ext_needed_joinee: IndexSet<String> =
            needed.iter().filter(|n| joinee_fields.contains(*n)).cloned().collect();
        if *optional && ext_needed_joinee.is_empty() {
            let tail_linked = link_pipeline(tail, needed)?;
            return Ok(Node::new(NodeKind::RoutedJoin {
                inner: tail_linked,
                keep: false,
            }));
        }
        let tail_fields = row_fields_in_order(resolved_ty(tail));
        let on_refs = scalar_refs(on);
        let needed_tail: IndexSet<String> = needed
            .iter()
            .filter(|n| tail_fields.contains(*n))
            .cloned()
            .chain(on_refs.iter().filter(|n| tail_fields.contains(*n)).cloned())
            .collect();
        let needed_joinee: IndexSet<String> = ext_needed_joinee
            .into_iter()
            .chain(on_refs.iter().filter(|n| joinee_fields.contains(*n)).cloned())
            .collect();
        let tail_linked = link_pipeline(tail, &needed_tail)?;
        let joinee_linked = link_pipeline(joinee, &needed_joinee)?;
        let on_linked = link_scalar(on)?;
        let new_kind = NodeKind::Join {
            tail: tail_linked,
            joinee: joinee_linked,
            on: on_linked,
            left: *left,
            right: *right,
            optional: *optional,
            lateral: *lateral,
        };
        return Ok(wrap_linked(new_kind, label, ty, needed));
    }

    let new_kind = match &inner.kind {
        NodeKind::From(name) => NodeKind::From(name.clone()),

        NodeKind::Where { tail, cond } => {
            let refs = scalar_refs(cond);
            let needed_tail: IndexSet<String> = needed.iter().cloned().chain(refs).collect();
            NodeKind::Where {
                tail: link_pipeline(tail, &needed_tail)?,
                cond: link_scalar(cond)?,
            }
        }

        NodeKind::Select { tail, items } => {
            let mut needed_tail = IndexSet::new();
            for item in items {
                needed_tail.extend(scalar_refs(item));
            }
            NodeKind::Select {
                tail: link_pipeline(tail, &needed_tail)?,
                items: items.iter().map(link_scalar).collect::<Result<_>>()?,
            }
        }

        NodeKind::Define { tail, items } => {
            let item_labels: IndexSet<String> =
                items.iter().filter_map(|i| i.default_label()).collect();
            let mut needed_tail: IndexSet<String> =
                needed.iter().filter(|n| !item_labels.contains(*n)).cloned().collect();
            for item in items {
                let item_label = item.default_label();
                if item_label.as_deref().map(|l| needed.contains(l)).unwrap_or(true) {
                    needed_tail.extend(scalar_refs(item));
                }
            }
            NodeKind::Define {
                tail: link_pipeline(tail, &needed_tail)?,
                items: items.iter().map(link_scalar).collect::<Result<_>>()?,
            }
        }

        NodeKind::Append { tail, others } => NodeKind::Append {
            tail: link_pipeline(tail, needed)?,
            others: others
                .iter()
                .map(|o| link_pipeline(o, needed))
                .collect::<Result<_>>()?,
        },

        NodeKind::Iterate { tail, iterator } => {
            let seed_fields = row_fields_in_order(resolved_ty(tail));
            NodeKind::Iterate {
                tail: link_pipeline(tail, &seed_fields)?,
                iterator: link_pipeline(iterator, &seed_fields)?,
            }
        }

        NodeKind::With {
            tail,
            args,
            materialized,
        } => {
            let mut used = used_with_names(tail);
            let mut kept_rev = Vec::new();
            for arg in args.iter().rev() {
                let arg_label = resolved_inner(arg).label.clone().unwrap_or_default();
                if used.contains(&arg_label) {
                    used.extend(used_with_names(arg));
                    let arg_fields = row_fields_in_order(resolved_ty(arg));
                    kept_rev.push(link_pipeline(arg, &arg_fields)?);
                }
            }
            kept_rev.reverse();
            NodeKind::With {
                tail: link_pipeline(tail, needed)?,
                args: kept_rev,
                materialized: *materialized,
            }
        }

        NodeKind::WithExternal {
            tail,
            args,
            handler,
        } => {
            let mut linked_args = Vec::with_capacity(args.len());
            for arg in args {
                let arg_fields = row_fields_in_order(resolved_ty(arg));
                linked_args.push(link_pipeline(arg, &arg_fields)?);
            }
            NodeKind::WithExternal {
                tail: link_pipeline(tail, needed)?,
                args: linked_args,
                handler: handler.clone(),
            }
        }

        NodeKind::Bind { tail, args } => NodeKind::Bind {
            args: args.iter().map(link_scalar).collect::<Result<_>>()?,
            tail: link_pipeline(tail, needed)?,
        },

        NodeKind::Group { tail, keys } => {
            let tail_fields = row_fields_in_order(resolved_ty(tail));
            let mut needed_tail: IndexSet<String> =
                needed.iter().filter(|n| tail_fields.contains(*n)).cloned().collect();
            for k in keys {
                needed_tail.extend(scalar_refs(k));
            }
            NodeKind::Group {
                tail: link_pipeline(tail, &needed_tail)?,
                keys: keys.iter().map(link_scalar).collect::<Result<_>>()?,
            }
        }

        NodeKind::Partition {
            tail,
            keys,
            order_by,
            frame,
        } => {
            let tail_fields = row_fields_in_order(resolved_ty(tail));
            let mut needed_tail: IndexSet<String> =
                needed.iter().filter(|n| tail_fields.contains(*n)).cloned().collect();
            for k in keys {
                needed_tail.extend(scalar_refs(k));
            }
            for o in order_by {
                needed_tail.extend(scalar_refs(o));
            }
            NodeKind::Partition {
                tail: link_pipeline(tail, &needed_tail)?,
                keys: keys.iter().map(link_scalar).collect::<Result<_>>()?,
                order_by: order_by.iter().map(link_scalar).collect::<Result<_>>()?,
                frame: frame.clone(),
            }
        }

        NodeKind::Order { tail, by } => {
            let mut needed_tail = needed.clone();
            for b in by {
                needed_tail.extend(scalar_refs(b));
            }
            NodeKind::Order {
                tail: link_pipeline(tail, &needed_tail)?,
                by: by.iter().map(link_scalar).collect::<Result<_>>()?,
            }
        }

        NodeKind::Limit {
            tail,
            offset,
            count,
            with_ties,
        } => NodeKind::Limit {
            tail: link_pipeline(tail, needed)?,
            offset: *offset,
            count: *count,
            with_ties: *with_ties,
        },

        NodeKind::As { tail, name } => {
            let tail_fields = row_fields_in_order(resolved_ty(tail));
            let needed_tail = if needed.contains(name) {
                tail_fields
            } else {
                // Conservative fallback: nested-record usage can't be
                // pruned field-by-field without deeper per-column tracking
                // through the `As` boundary (see DESIGN.md); keep the full
                // row rather than risk an empty projection downstream.
                tail_fields
            };
            NodeKind::As {
                tail: link_pipeline(tail, &needed_tail)?,
                name: name.clone(),
            }
        }

        NodeKind::Join { .. } => unreachable!("handled above"),

        other => unreachable!("{other:?} is not a pipeline node"),
    };

    Ok(wrap_linked(new_kind, label, ty, needed))
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

    #[test]
    fn drops_unreferenced_join() {
        let cat = catalog();
        let q = join(
            from("person"),
            from("location").r#as("loc"),
            get("location_id").eq(get("loc").get("location_id")),
            true,
            false,
            true,
            false,
        );
        let q = select(q, get("person_id")).unwrap();
        let resolved = crate::resolver::resolve(q.node(), &cat).unwrap();
        let linked = link(&resolved).unwrap();
        let txt = format!("{linked:?}");
        assert!(txt.contains("RoutedJoin"));
        assert!(txt.contains("keep: false"));
    }

    #[test]
    fn keeps_referenced_join() {
        let cat = catalog();
        let q = join(
            from("person"),
            from("location").r#as("l"),
            get("location_id").eq(get("l").get("location_id")),
            true,
            false,
            true,
            false,
        );
        let q = select(q, [get("person_id"), get("l").get("state")]).unwrap();
        let resolved = crate::resolver::resolve(q.node(), &cat).unwrap();
        let linked = link(&resolved).unwrap();
        let txt = format!("{linked:?}");
        assert!(!txt.contains("keep: false"));
    }
}

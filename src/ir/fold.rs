//! Fold pattern for the Semantic IR (ref.
//! <https://rust-unofficial.github.io/patterns/patterns/creational/fold.html>).
//!
//! Each pass (resolver, linker, translator) implements [NodeFold] and
//! overrides just the node kinds it cares about; the default methods walk
//! the rest of the tree unchanged. Since [Node]s are immutable and shared
//! (`Rc`), folding produces fresh nodes rather than mutating in place.

use std::rc::Rc;

use anyhow::Result;

use super::{Node, NodeKind, NodeRef};

pub trait NodeFold {
    fn fold_node(&mut self, node: NodeRef) -> Result<NodeRef> {
        fold_node(self, node)
    }

    fn fold_nodes(&mut self, nodes: Vec<NodeRef>) -> Result<Vec<NodeRef>> {
        nodes.into_iter().map(|n| self.fold_node(n)).collect()
    }

    fn fold_kind(&mut self, kind: NodeKind) -> Result<NodeKind> {
        fold_kind(self, kind)
    }
}

/// Default walk: re-fold every `NodeRef` a kind owns, leaving scalars and
/// strings untouched.
pub fn fold_kind<F: NodeFold + ?Sized>(fold: &mut F, kind: NodeKind) -> Result<NodeKind> {
    use NodeKind::*;
    Ok(match kind {
        From(name) => From(name),
        Where { tail, cond } => Where {
            tail: fold.fold_node(tail)?,
            cond: fold.fold_node(cond)?,
        },
        Select { tail, items } => Select {
            tail: fold.fold_node(tail)?,
            items: fold.fold_nodes(items)?,
        },
        Define { tail, items } => Define {
            tail: fold.fold_node(tail)?,
            items: fold.fold_nodes(items)?,
        },
        Join {
            tail,
            joinee,
            on,
            left,
            right,
            optional,
            lateral,
        } => Join {
            tail: fold.fold_node(tail)?,
            joinee: fold.fold_node(joinee)?,
            on: fold.fold_node(on)?,
            left,
            right,
            optional,
            lateral,
        },
        Append { tail, others } => Append {
            tail: fold.fold_node(tail)?,
            others: fold.fold_nodes(others)?,
        },
        Iterate { tail, iterator } => Iterate {
            tail: fold.fold_node(tail)?,
            iterator: fold.fold_node(iterator)?,
        },
        With {
            tail,
            args,
            materialized,
        } => With {
            tail: fold.fold_node(tail)?,
            args: fold.fold_nodes(args)?,
            materialized,
        },
        WithExternal {
            tail,
            args,
            handler,
        } => WithExternal {
            tail: fold.fold_node(tail)?,
            args: fold.fold_nodes(args)?,
            handler,
        },
        Bind { tail, args } => Bind {
            tail: fold.fold_node(tail)?,
            args: fold.fold_nodes(args)?,
        },
        Group { tail, keys } => Group {
            tail: fold.fold_node(tail)?,
            keys: fold.fold_nodes(keys)?,
        },
        Partition {
            tail,
            keys,
            order_by,
            frame,
        } => Partition {
            tail: fold.fold_node(tail)?,
            keys: fold.fold_nodes(keys)?,
            order_by: fold.fold_nodes(order_by)?,
            frame,
        },
        Order { tail, by } => Order {
            tail: fold.fold_node(tail)?,
            by: fold.fold_nodes(by)?,
        },
        Limit {
            tail,
            offset,
            count,
            with_ties,
        } => Limit {
            tail: fold.fold_node(tail)?,
            offset,
            count,
            with_ties,
        },
        As { tail, name } => As {
            tail: fold.fold_node(tail)?,
            name,
        },
        Get { name, inner } => Get {
            name,
            inner: inner.map(|i| fold.fold_node(i)).transpose()?,
        },
        Var(name) => Var(name),
        Lit(lit) => Lit(lit),
        Fun { name, args } => Fun {
            name,
            args: fold.fold_nodes(args)?,
        },
        Agg { name, args, filter } => Agg {
            name,
            args: fold.fold_nodes(args)?,
            filter: filter.map(|f| fold.fold_node(f)).transpose()?,
        },
        Sort {
            value,
            order,
            nulls,
        } => Sort {
            value: fold.fold_node(value)?,
            order,
            nulls,
        },
        Resolved { inner, ty } => Resolved {
            inner: fold.fold_node(inner)?,
            ty,
        },
        Linked {
            inner,
            refs,
            n_ext_refs,
        } => Linked {
            inner: fold.fold_node(inner)?,
            refs,
            n_ext_refs,
        },
        Nested { name } => Nested { name },
        BoundVariable { name, depth } => BoundVariable { name, depth },
        RoutedJoin { inner, keep } => RoutedJoin {
            inner: fold.fold_node(inner)?,
            keep,
        },
        IsolatedSubquery(inner) => IsolatedSubquery(fold.fold_node(inner)?),
        FromNothing => FromNothing,
        FromTable(name) => FromTable(name),
        FromTableExpression(inner) => FromTableExpression(fold.fold_node(inner)?),
        FromIterate(inner) => FromIterate(fold.fold_node(inner)?),
        FromValues(rows) => FromValues(rows),
        FromFunction { name, args } => FromFunction {
            name,
            args: fold.fold_nodes(args)?,
        },
        Padding => Padding,
    })
}

pub fn fold_node<F: NodeFold + ?Sized>(fold: &mut F, node: NodeRef) -> Result<NodeRef> {
    // Avoid cloning the whole node when folding is a no-op for shared
    // leaves; `Rc::try_unwrap` only succeeds when we hold the only handle.
    match Rc::try_unwrap(node) {
        Ok(node) => {
            let kind = fold.fold_kind(node.kind)?;
            Ok(Rc::new(Node {
                kind,
                label: node.label,
            }))
        }
        Err(node) => {
            let kind = fold.fold_kind(node.kind.clone())?;
            Ok(Rc::new(Node {
                kind,
                label: node.label.clone(),
            }))
        }
    }
}

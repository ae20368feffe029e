//! Row types: the compile-time shape of a node's output.
//!
//! `GroupRow` names two related but distinct things: a resolved node's whole
//! type (the direct output of `Group`) and a nested field's type (the grouped
//! row available to aggregate functions inside a windowed, not grouped,
//! pipeline). We give `RowType` a `Group` variant for the former and
//! `FieldType` a `GroupRow` variant for the latter, used when `Partition`
//! augments a row in place (per-row passthrough) with a hidden
//! aggregate-scope field rather than replacing the row's shape outright —
//! see DESIGN.md's Open Questions.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Reserved field name under which `Partition` stashes its aggregate scope;
/// never emitted to SQL, never reachable by a user `Get`.
pub const SCOPE_FIELD: &str = "\0scope";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowType {
    Empty,
    Row(Row),
    /// The direct output of `Group(keys)`: one row per distinct key tuple,
    /// with `aggregate_scope` the pre-grouping row available to `Agg` args.
    Group { keys: Row, aggregate_scope: Row },
    /// The resolved type of a scalar node (`Get`/`Var`/`Lit`/`Fun`/`Agg`/
    /// `Sort`). Pipeline-node types are the primary case, but every `Node`
    /// carries a `Resolved` annotation and scalar nodes need a slot too.
    Scalar(FieldType),
}

/// An insertion-ordered, name-unique set of fields. Order is preserved
/// where user-visible (`Select`/`Define` output); uniqueness is enforced at
/// IR-construction time, so a `Row` never actually contains a duplicate key.
pub type Row = IndexMap<String, FieldType>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum FieldType {
    Scalar,
    Row(Row),
    /// Legal to carry, illegal to reference: produced when a `Join`
    /// introduces two columns with the same name and neither side is
    /// disambiguated with `As`. `sources` names the contributing branches,
    /// for error messages.
    Ambiguous(BTreeSet<String>),
    /// Stashed under [SCOPE_FIELD] by `Partition`, so that `Agg` arguments
    /// inside a windowed (not grouped) pipeline still resolve against the
    /// pre-partition row while every other column passes through untouched.
    GroupRow {
        keys: Box<Row>,
        aggregate_scope: Box<Row>,
    },
}

impl RowType {
    pub fn as_row(&self) -> Option<&Row> {
        match self {
            RowType::Row(r) => Some(r),
            RowType::Group { keys, .. } => Some(keys),
            RowType::Empty | RowType::Scalar(_) => None,
        }
    }

    /// The row that `Agg` arguments resolve against: either this type's own
    /// `Group` scope, or a `Partition`-stashed [SCOPE_FIELD], if present.
    pub fn aggregate_scope(&self) -> Option<&Row> {
        match self {
            RowType::Group {
                aggregate_scope, ..
            } => Some(aggregate_scope),
            RowType::Row(r) => match r.get(SCOPE_FIELD) {
                Some(FieldType::GroupRow {
                    aggregate_scope, ..
                }) => Some(aggregate_scope),
                _ => None,
            },
            RowType::Empty | RowType::Scalar(_) => None,
        }
    }
}

pub fn empty_row() -> Row {
    IndexMap::new()
}

/// A single unit-row column, used as `From(None)`'s type before `Select`
/// discards it.
pub fn unit_row() -> Row {
    let mut row = empty_row();
    row.insert("_".to_string(), FieldType::Scalar);
    row
}

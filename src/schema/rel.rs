//! Relationship descriptors produced by path-finding and consumed by the
//! select compiler and the SQL renderer.

use super::table::{Column, Table};

/// How two tables connect. The discriminator drives singularity inference,
/// join rendering, and render-skip decisions downstream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RelType {
    /// No relationship; the default for root selects.
    None,
    /// Each left row references exactly one right row.
    OneToOne,
    /// Each left row is referenced by many right rows.
    OneToMany,
    /// Discriminated at query time through a virtual table's type column.
    Polymorphic,
    /// A table's foreign key pointing at itself.
    Recursive,
    /// An embedded JSON document exposed as a table.
    Embedded,
    /// Rows resolved by an external service; never joined.
    Remote,
    /// Sentinel installed by `@not_related` to suppress path lookup.
    Skip,
}

impl Default for RelType {
    fn default() -> Self {
        RelType::None
    }
}

/// One side of a relationship: a table and the column carrying the link.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelSide {
    /// Table on this side.
    pub table: Table,
    /// Linking column on this side.
    pub col: Column,
}

/// A resolved relationship between two tables.
///
/// `left` is always the child select's table; `right` belongs to the parent
/// (or to the next intermediate table for join steps).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rel {
    /// Relationship discriminator.
    pub rel_type: RelType,
    /// Child-side table and column.
    pub left: RelSide,
    /// Parent-side table and column.
    pub right: RelSide,
    /// Virtual table realising the link, for polymorphic relationships.
    pub v_table: Option<String>,
}

/// One edge of a resolved path through the relationship graph.
#[derive(Clone, Debug, PartialEq)]
pub struct TPath {
    /// Edge discriminator.
    pub rel_type: RelType,
    /// Table the edge leaves from.
    pub left_table: Table,
    /// Column on the leaving side.
    pub left_col: Column,
    /// Table the edge arrives at.
    pub right_table: Table,
    /// Column on the arriving side.
    pub right_col: Column,
}

/// Converts a path edge into the relationship descriptor selects carry.
pub fn path_to_rel(p: TPath) -> Rel {
    let v_table = match p.rel_type {
        RelType::Polymorphic => Some(p.left_table.name.clone()),
        _ => None,
    };
    Rel {
        rel_type: p.rel_type,
        left: RelSide {
            table: p.left_table,
            col: p.left_col,
        },
        right: RelSide {
            table: p.right_table,
            col: p.right_col,
        },
        v_table,
    }
}

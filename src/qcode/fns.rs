//! Field-name classification: plain columns, aggregate and search
//! functions, typename markers, and cursor markers.

use rustc_hash::FxHashMap;

use crate::schema::DbFunction;

/// Built-in aggregate prefixes, longest first so `stddev_pop_` wins over
/// `stddev_`.
const AGG_PREFIXES: &[(&str, &str)] = &[
    ("stddev_samp_", "stddev_samp"),
    ("stddev_pop_", "stddev_pop"),
    ("stddev_", "stddev"),
    ("var_samp_", "var_samp"),
    ("var_pop_", "var_pop"),
    ("variance_", "variance"),
    ("count_", "count"),
    ("avg_", "avg"),
    ("max_", "max"),
    ("min_", "min"),
    ("sum_", "sum"),
];

/// A recognised function selection, before its expression is resolved
/// against the schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FuncCall {
    /// Function name without the trailing separator.
    pub name: String,
    /// Remainder of the field name: a column, or a `_table__column`
    /// cross-table reference.
    pub expr: String,
    /// Whether the function aggregates rows.
    pub agg: bool,
    /// Whether the selection requires a `search` argument on the select.
    pub requires_search: bool,
}

/// Outcome of classifying one selected field name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FieldClass {
    /// `__typename`; sets the marker on the owning select.
    Typename,
    /// Cursor projections handled by paging synthesis.
    Skip,
    /// A function selection.
    Function(FuncCall),
    /// An ordinary column (or a sub-selection, decided by the caller).
    Column,
}

/// Classifies a field name against the built-in function set and the
/// registered unary schema functions.
pub(crate) fn classify(name: &str, functions: &FxHashMap<String, DbFunction>) -> FieldClass {
    if name == "__typename" {
        return FieldClass::Typename;
    }
    if name.ends_with("_cursor") {
        return FieldClass::Skip;
    }
    if name == "search_rank" {
        return FieldClass::Function(FuncCall {
            name: "search_rank".to_owned(),
            expr: String::new(),
            agg: false,
            requires_search: true,
        });
    }
    if let Some(rest) = name.strip_prefix("search_headline_") {
        return FieldClass::Function(FuncCall {
            name: "search_headline".to_owned(),
            expr: rest.to_owned(),
            agg: false,
            requires_search: true,
        });
    }
    for (prefix, fname) in AGG_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            return FieldClass::Function(FuncCall {
                name: (*fname).to_owned(),
                expr: rest.to_owned(),
                agg: true,
                requires_search: false,
            });
        }
    }
    for fname in functions.keys() {
        if let Some(rest) = name.strip_prefix(fname.as_str()) {
            if let Some(rest) = rest.strip_prefix('_') {
                if !rest.is_empty() {
                    return FieldClass::Function(FuncCall {
                        name: fname.clone(),
                        expr: rest.to_owned(),
                        agg: true,
                        requires_search: false,
                    });
                }
            }
        }
    }
    FieldClass::Column
}

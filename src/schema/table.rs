//! Catalogue entities: tables, columns, virtual tables, and database
//! functions.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};

/// Target database dialect. All dialect branches in the compiler key off
/// this single discriminator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// PostgreSQL semantics: `DISTINCT ON`, tsvector search, variable limits.
    Postgres,
    /// MySQL semantics: distinct-on folding, fulltext search, literal limits.
    Mysql,
}

impl Default for DbType {
    fn default() -> Self {
        DbType::Postgres
    }
}

/// Discriminates how a catalogue entry is realised.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    /// An ordinary relational table.
    Table,
    /// A database view; compiled like a table.
    View,
    /// A synthetic node realising a polymorphic relationship.
    Virtual,
    /// Rows fetched by an external service; never joined.
    Remote,
    /// A `json` column exposed as an embedded table.
    Json,
    /// A `jsonb` column exposed as an embedded table.
    Jsonb,
}

impl TableType {
    /// True for embedded-JSON entries.
    pub fn is_json(self) -> bool {
        matches!(self, TableType::Json | TableType::Jsonb)
    }
}

impl Default for TableType {
    fn default() -> Self {
        TableType::Table
    }
}

/// Foreign-key target carried on a column.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Target schema; empty inherits the owning table's schema.
    #[serde(default)]
    pub schema: String,
    /// Target table name.
    pub table: String,
    /// Target column name; empty means the reference is table-only and
    /// produces no relationship edge.
    #[serde(default)]
    pub column: String,
}

/// Reference to a column of another table, used by embedded-JSON entries to
/// point back at the column that stores them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Schema of the referenced table.
    pub schema: String,
    /// Referenced table name.
    pub table: String,
    /// Referenced column name.
    pub column: String,
}

/// One column of a catalogue table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Owning schema; filled in from the table during construction.
    #[serde(default)]
    pub schema: String,
    /// Owning table; filled in from the table during construction.
    #[serde(default)]
    pub table: String,
    /// Column name.
    pub name: String,
    /// Raw SQL type name.
    #[serde(default)]
    pub sql_type: String,
    /// NOT NULL constraint.
    #[serde(default)]
    pub not_null: bool,
    /// Primary-key membership.
    #[serde(default)]
    pub primary_key: bool,
    /// Unique constraint (primary keys are unique by definition).
    #[serde(default)]
    pub unique_key: bool,
    /// Array-typed column.
    #[serde(default)]
    pub array: bool,
    /// Member of a full-text index (tsvector on Postgres).
    #[serde(default)]
    pub full_text: bool,
    /// Foreign-key target, when the column references another table.
    #[serde(default)]
    pub fkey: Option<ForeignKey>,
    /// Access-blocked column.
    #[serde(default)]
    pub blocked: bool,
}

/// One table of the catalogue, with an index over its columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    /// Owning schema.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Realisation of this entry.
    pub typ: TableType,
    /// Columns in catalogue order.
    pub columns: Vec<Column>,
    /// Primary-key column, when one is declared.
    pub primary_col: Option<Column>,
    /// Backing column for embedded-JSON entries.
    pub secondary: Option<ColumnRef>,
    /// Columns participating in full-text indexes.
    pub full_text: Vec<Column>,
    /// Access-blocked table.
    pub blocked: bool,
    col_index: FxHashMap<String, usize>,
}

impl Table {
    /// Builds a table, normalising column ownership and deriving the
    /// column index, primary column, and full-text set.
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        typ: TableType,
        mut columns: Vec<Column>,
    ) -> Self {
        let schema = schema.into();
        let name = name.into();
        let mut col_index = FxHashMap::default();
        for (i, col) in columns.iter_mut().enumerate() {
            if col.schema.is_empty() {
                col.schema = schema.clone();
            }
            if col.table.is_empty() {
                col.table = name.clone();
            }
            col_index.insert(col.name.to_lowercase(), i);
        }
        let primary_col = columns.iter().find(|c| c.primary_key).cloned();
        let full_text = columns.iter().filter(|c| c.full_text).cloned().collect();
        Self {
            schema,
            name,
            typ,
            columns,
            primary_col,
            secondary: None,
            full_text,
            blocked: false,
            col_index,
        }
    }

    /// Marks the table blocked.
    pub fn block(mut self) -> Self {
        self.blocked = true;
        self
    }

    /// Attaches the backing column reference for embedded-JSON entries.
    pub fn backed_by(mut self, secondary: ColumnRef) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Looks a column up by name, case-insensitively.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.col_index
            .get(&name.to_lowercase())
            .map(|&i| &self.columns[i])
    }

    /// Looks a column up by name, failing with the canonical error.
    pub fn get_column(&self, name: &str) -> Result<Column> {
        self.column(name)
            .cloned()
            .ok_or_else(|| CompileError::ColumnNotFound {
                table: self.name.clone(),
                column: name.to_owned(),
            })
    }
}

/// A virtual table realising a polymorphic relationship. Every concrete
/// table carrying both the id and the type column spawns a synthetic
/// catalogue node named after the virtual table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualTable {
    /// Name exposed to queries.
    pub name: String,
    /// Column holding the target row id.
    pub id_column: String,
    /// Column discriminating the target table.
    pub type_column: String,
    /// Synthetic foreign-key column name used on the virtual node.
    pub fkey_column: String,
}

/// Parameter of a database function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionParam {
    /// Parameter name.
    pub name: String,
    /// Raw SQL type name.
    pub sql_type: String,
}

/// A database function. Only unary functions are registered for use as
/// field-name prefixes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbFunction {
    /// Function name.
    pub name: String,
    /// Declared parameters.
    pub params: Vec<FunctionParam>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Table {
        Table::new(
            "public",
            "users",
            TableType::Table,
            vec![
                Column {
                    name: "id".into(),
                    primary_key: true,
                    unique_key: true,
                    ..Column::default()
                },
                Column {
                    name: "email".into(),
                    unique_key: true,
                    ..Column::default()
                },
            ],
        )
    }

    #[test]
    fn table_normalises_column_ownership() {
        let t = users();
        assert_eq!(t.columns[0].schema, "public");
        assert_eq!(t.columns[0].table, "users");
        assert_eq!(t.primary_col.as_ref().map(|c| c.name.as_str()), Some("id"));
    }

    #[test]
    fn column_lookup_is_case_insensitive() {
        let t = users();
        assert!(t.column("EMAIL").is_some());
        let err = t.get_column("missing").unwrap_err();
        assert_eq!(
            err.to_string(),
            "column 'users.missing' not found".to_owned()
        );
    }
}

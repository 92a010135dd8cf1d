//! Relational schema catalogue and relationship graph.
//!
//! The schema is built once from introspected catalogue data and is
//! read-only afterwards; concurrent compiles share it freely. Tables live in
//! an arena indexed by dense node ids, the relationship graph stores those
//! ids, and name resolution goes through lowercased indexes that treat
//! aliases and inflected forms the same as canonical names.

mod graph;
mod rel;
mod table;

pub use rel::{path_to_rel, Rel, RelSide, RelType, TPath};
pub use table::{
    Column, ColumnRef, DbFunction, DbType, ForeignKey, FunctionParam, Table, TableType,
    VirtualTable,
};

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{CompileError, Result};
use graph::{GraphEdge, RelGraph};

/// Traversal cost per relationship kind. Direct key relationships beat
/// embedded, polymorphic, and remote hops when several routes exist.
fn rel_weight(rt: RelType) -> u32 {
    match rt {
        RelType::OneToOne => 1,
        RelType::OneToMany => 2,
        RelType::Recursive => 3,
        RelType::Embedded => 3,
        RelType::Polymorphic => 4,
        RelType::Remote => 5,
        _ => 10,
    }
}

/// Immutable schema catalogue plus relationship graph.
#[derive(Debug)]
pub struct Schema {
    db_type: DbType,
    schema: String,
    tables: Vec<Table>,
    tindex: FxHashMap<String, usize>,
    alias_index: FxHashMap<String, usize>,
    virtual_tables: FxHashMap<String, VirtualTable>,
    functions: FxHashMap<String, DbFunction>,
    graph: RelGraph,
}

/// Staged construction of a [`Schema`] from catalogue data.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    db_type: DbType,
    schema: String,
    tables: Vec<Table>,
    virtual_tables: Vec<VirtualTable>,
    functions: Vec<DbFunction>,
    aliases: FxHashMap<String, Vec<String>>,
}

impl SchemaBuilder {
    /// Starts a schema for the given dialect and default schema name.
    pub fn new(db_type: DbType, default_schema: impl Into<String>) -> Self {
        Self {
            db_type,
            schema: default_schema.into(),
            ..Self::default()
        }
    }

    /// Adds a catalogue table.
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds a virtual table realising a polymorphic relationship.
    pub fn virtual_table(mut self, vt: VirtualTable) -> Self {
        self.virtual_tables.push(vt);
        self
    }

    /// Registers a database function; only unary functions are kept.
    pub fn function(mut self, f: DbFunction) -> Self {
        self.functions.push(f);
        self
    }

    /// Registers an alias for a table name.
    pub fn alias(mut self, table: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aliases
            .entry(table.into().to_lowercase())
            .or_default()
            .push(alias.into());
        self
    }

    /// Resolves relationships and freezes the schema.
    pub fn build(self) -> Result<Schema> {
        let mut s = Schema {
            db_type: self.db_type,
            schema: self.schema,
            tables: Vec::new(),
            tindex: FxHashMap::default(),
            alias_index: FxHashMap::default(),
            virtual_tables: FxHashMap::default(),
            functions: FxHashMap::default(),
            graph: RelGraph::default(),
        };

        let real = self.tables.len();
        for t in self.tables {
            s.add_node(t);
        }

        for (tname, aliases) in &self.aliases {
            if let Some(&nid) = s.tindex.get(&format!("{}:{}", s.schema, tname)) {
                for a in aliases {
                    s.alias_index.insert(a.to_lowercase(), nid);
                }
            }
        }

        for vt in self.virtual_tables {
            s.add_virtual(vt, real);
        }

        for nid in 0..s.tables.len() {
            s.add_rels(nid)?;
        }

        for f in self.functions {
            if f.params.len() == 1 {
                s.functions.insert(f.name.to_lowercase(), f);
            }
        }

        Ok(s)
    }
}

impl Schema {
    /// Target database dialect.
    pub fn db_type(&self) -> DbType {
        self.db_type
    }

    /// Default schema name for unqualified lookups.
    pub fn default_schema(&self) -> &str {
        &self.schema
    }

    /// Registered unary functions, keyed by lowercased name.
    pub fn functions(&self) -> &FxHashMap<String, DbFunction> {
        &self.functions
    }

    /// Looks a table up by schema and name, honouring aliases and
    /// singular/plural inflections of the name.
    pub fn find(&self, schema: &str, name: &str) -> Result<Table> {
        self.resolve_in(schema, name)
            .map(|nid| self.tables[nid].clone())
            .ok_or_else(|| CompileError::TableNotFound(name.to_owned()))
    }

    /// Finds the shortest relationship path from a child field name to its
    /// parent field name, optionally forced through an intermediate table.
    ///
    /// An empty path means both names resolve to the same non-recursive
    /// table; an unreachable pair also yields an empty path so the caller
    /// can report the relationship error with field-level context.
    pub fn find_path(&self, child: &str, parent: &str, through: Option<&str>) -> Result<Vec<TPath>> {
        trace!(%child, %parent, "resolving relationship path");
        let cn = self
            .resolve_node(child)
            .ok_or_else(|| CompileError::TableNotFound(child.to_owned()))?;
        let pn = self
            .resolve_node(parent)
            .ok_or_else(|| CompileError::TableNotFound(parent.to_owned()))?;

        if cn == pn {
            return Ok(self
                .graph
                .self_edge(cn)
                .map(|eid| vec![self.edge_to_path(eid)])
                .unwrap_or_default());
        }

        let edges = match through {
            Some(via) => {
                let vn = self
                    .resolve_node(via)
                    .ok_or_else(|| CompileError::TableNotFound(via.to_owned()))?;
                match (self.graph.shortest_path(cn, vn), self.graph.shortest_path(vn, pn)) {
                    (Some(mut a), Some(b)) => {
                        a.extend(b);
                        Some(a)
                    }
                    _ => None,
                }
            }
            None => self.graph.shortest_path(cn, pn),
        };

        Ok(edges
            .unwrap_or_default()
            .into_iter()
            .map(|eid| self.edge_to_path(eid))
            .collect())
    }

    fn edge_to_path(&self, eid: usize) -> TPath {
        let e = self.graph.edge(eid);
        TPath {
            rel_type: e.rel_type,
            left_table: self.tables[e.from].clone(),
            left_col: e.left_col.clone(),
            right_table: self.tables[e.to].clone(),
            right_col: e.right_col.clone(),
        }
    }

    fn resolve_in(&self, schema: &str, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        let schema = schema.to_lowercase();
        if let Some(&nid) = self.tindex.get(&format!("{schema}:{name}")) {
            return Some(nid);
        }
        if let Some(&nid) = self.alias_index.get(&name) {
            return Some(nid);
        }
        for form in [singularize(&name), pluralize(&name)] {
            if form != name {
                if let Some(&nid) = self.tindex.get(&format!("{schema}:{form}")) {
                    return Some(nid);
                }
                if let Some(&nid) = self.alias_index.get(&form) {
                    return Some(nid);
                }
            }
        }
        None
    }

    fn resolve_node(&self, name: &str) -> Option<usize> {
        self.resolve_in(&self.schema, name)
    }

    fn add_node(&mut self, table: Table) -> usize {
        let nid = self.graph.add_node();
        self.tindex.insert(
            format!("{}:{}", table.schema.to_lowercase(), table.name.to_lowercase()),
            nid,
        );
        self.tables.push(table);
        nid
    }

    /// Spawns one synthetic virtual node per concrete table that carries
    /// both the id and the type column of the virtual table.
    fn add_virtual(&mut self, vt: VirtualTable, real: usize) {
        for nid in 0..real {
            let t = &self.tables[nid];
            let (Some(id_col), Some(type_col)) = (t.column(&vt.id_column), t.column(&vt.type_column))
            else {
                continue;
            };

            let fkey_col = Column {
                schema: t.schema.clone(),
                table: t.name.clone(),
                name: vt.fkey_column.clone(),
                sql_type: id_col.sql_type.clone(),
                fkey: Some(ForeignKey {
                    schema: type_col.schema.clone(),
                    table: type_col.table.clone(),
                    column: type_col.name.clone(),
                }),
                ..Column::default()
            };
            let mut node = Table::new(t.schema.clone(), vt.name.clone(), TableType::Virtual, vec![]);
            node.primary_col = Some(fkey_col);
            self.add_node(node);
        }
        self.virtual_tables.insert(vt.name.to_lowercase(), vt);
    }

    fn add_rels(&mut self, nid: usize) -> Result<()> {
        match self.tables[nid].typ {
            TableType::Json | TableType::Jsonb => self.add_json_rel(nid)?,
            TableType::Virtual => self.add_primary_rel(nid, RelType::Polymorphic)?,
            TableType::Remote => self.add_primary_rel(nid, RelType::Remote)?,
            _ => {}
        }
        self.add_column_rels(nid)
    }

    /// Embedded-JSON entries link to the column that stores them.
    fn add_json_rel(&mut self, nid: usize) -> Result<()> {
        let t = &self.tables[nid];
        let Some(secondary) = t.secondary.clone() else {
            return Ok(());
        };
        let Some(pcol) = t.primary_col.clone() else {
            return Ok(());
        };
        let target = self.require_node(&secondary.schema, &secondary.table)?;
        let tcol = self.require_column(target, &secondary.column)?;
        self.push_edge(nid, pcol, target, tcol, RelType::Embedded);
        Ok(())
    }

    /// Virtual and remote entries link through their primary column's
    /// foreign-key target, with a single specialised edge.
    fn add_primary_rel(&mut self, nid: usize, rt: RelType) -> Result<()> {
        let t = &self.tables[nid];
        let Some(pcol) = t.primary_col.clone() else {
            return Ok(());
        };
        let Some(fkey) = pcol.fkey.clone() else {
            return Ok(());
        };
        let schema = if fkey.schema.is_empty() {
            t.schema.clone()
        } else {
            fkey.schema
        };
        let target = self.require_node(&schema, &fkey.table)?;
        let tcol = self.require_column(target, &fkey.column)?;
        self.push_edge(nid, pcol, target, tcol, rt);
        Ok(())
    }

    /// Foreign-key columns produce paired edges: the direct edge classified
    /// by target uniqueness and a reverse edge with the opposite type.
    fn add_column_rels(&mut self, nid: usize) -> Result<()> {
        let specialised = !matches!(self.tables[nid].typ, TableType::Table | TableType::View);
        for ci in 0..self.tables[nid].columns.len() {
            let col = self.tables[nid].columns[ci].clone();
            // Specialised entries already linked through their primary
            // column; a second, cheaper edge would shadow that link.
            if specialised && self.tables[nid].primary_col.as_ref().map(|p| p.name.as_str()) == Some(col.name.as_str()) {
                continue;
            }
            let Some(fkey) = col.fkey.clone() else {
                continue;
            };
            if fkey.column.is_empty() {
                continue;
            }
            let schema = if fkey.schema.is_empty() {
                self.tables[nid].schema.clone()
            } else {
                fkey.schema.clone()
            };
            let target = self.require_node(&schema, &fkey.table)?;
            let tcol = self.require_column(target, &fkey.column)?;

            let rt = if self.tables[nid].name.eq_ignore_ascii_case(&fkey.table) {
                RelType::Recursive
            } else if tcol.unique_key || tcol.primary_key {
                RelType::OneToOne
            } else {
                RelType::OneToMany
            };

            if rt == RelType::Recursive {
                // A single self-loop carries both traversal directions.
                self.push_edge(nid, col, target, tcol, rt);
                continue;
            }

            let reverse = match rt {
                RelType::OneToOne => RelType::OneToMany,
                _ => RelType::OneToOne,
            };
            self.push_edge(nid, col.clone(), target, tcol.clone(), rt);
            self.push_edge(target, tcol, nid, col, reverse);
        }
        Ok(())
    }

    fn push_edge(&mut self, from: usize, left_col: Column, to: usize, right_col: Column, rt: RelType) {
        self.graph.add_edge(GraphEdge {
            from,
            to,
            weight: rel_weight(rt),
            rel_type: rt,
            left_col,
            right_col,
        });
    }

    fn require_node(&self, schema: &str, name: &str) -> Result<usize> {
        self.tindex
            .get(&format!("{}:{}", schema.to_lowercase(), name.to_lowercase()))
            .copied()
            .ok_or_else(|| CompileError::FkeyTableNotFound {
                schema: schema.to_owned(),
                table: name.to_owned(),
            })
    }

    fn require_column(&self, nid: usize, name: &str) -> Result<Column> {
        self.tables[nid]
            .column(name)
            .cloned()
            .ok_or_else(|| CompileError::FkeyColumnNotFound {
                table: self.tables[nid].name.clone(),
                column: name.to_owned(),
            })
    }
}

/// Naive English singularisation covering the common table-name shapes.
pub(crate) fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes"] {
        if let Some(stem) = name.strip_suffix("es") {
            if name.ends_with(suffix) {
                return stem.to_owned();
            }
        }
    }
    if name.ends_with("ss") {
        return name.to_owned();
    }
    if let Some(stem) = name.strip_suffix('s') {
        return stem.to_owned();
    }
    name.to_owned()
}

/// Naive English pluralisation, the inverse of [`singularize`].
pub(crate) fn pluralize(name: &str) -> String {
    if name.ends_with('y') && !name.ends_with("ay") && !name.ends_with("ey") && !name.ends_with("oy")
    {
        return format!("{}ies", &name[..name.len() - 1]);
    }
    for suffix in ["s", "sh", "ch", "x", "z"] {
        if name.ends_with(suffix) {
            return format!("{name}es");
        }
    }
    format!("{name}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> Column {
        Column {
            name: name.into(),
            ..Column::default()
        }
    }

    fn pk(name: &str) -> Column {
        Column {
            name: name.into(),
            primary_key: true,
            unique_key: true,
            ..Column::default()
        }
    }

    fn fk(name: &str, table: &str, column: &str) -> Column {
        Column {
            name: name.into(),
            fkey: Some(ForeignKey {
                schema: String::new(),
                table: table.into(),
                column: column.into(),
            }),
            ..Column::default()
        }
    }

    fn test_schema() -> Schema {
        SchemaBuilder::new(DbType::Postgres, "public")
            .table(Table::new(
                "public",
                "users",
                TableType::Table,
                vec![pk("id"), col("name")],
            ))
            .table(Table::new(
                "public",
                "posts",
                TableType::Table,
                vec![pk("id"), col("title"), fk("user_id", "users", "id")],
            ))
            .table(Table::new(
                "public",
                "comments",
                TableType::Table,
                vec![
                    pk("id"),
                    fk("post_id", "posts", "id"),
                    fk("parent_id", "comments", "id"),
                ],
            ))
            .alias("users", "people")
            .build()
            .expect("schema builds")
    }

    #[test]
    fn find_honours_aliases_and_inflection() {
        let s = test_schema();
        assert_eq!(s.find("public", "people").expect("alias").name, "users");
        assert_eq!(s.find("public", "user").expect("singular").name, "users");
        assert!(s.find("public", "missing").is_err());
    }

    #[test]
    fn fk_edges_classify_by_target_uniqueness() {
        let s = test_schema();
        let path = s.find_path("posts", "users", None).expect("path");
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].rel_type, RelType::OneToOne);
        assert_eq!(path[0].left_col.name, "user_id");
        assert_eq!(path[0].right_col.name, "id");

        let reverse = s.find_path("user", "posts", None).expect("reverse path");
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].rel_type, RelType::OneToMany);
        assert_eq!(reverse[0].right_col.name, "user_id");
    }

    #[test]
    fn multi_hop_paths_traverse_intermediates() {
        let s = test_schema();
        let path = s.find_path("comments", "users", None).expect("path");
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].left_table.name, "comments");
        assert_eq!(path[0].right_table.name, "posts");
        assert_eq!(path[1].right_table.name, "users");
    }

    #[test]
    fn recursive_tables_resolve_to_a_self_loop() {
        let s = test_schema();
        let path = s.find_path("comments", "comments", None).expect("path");
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].rel_type, RelType::Recursive);
        assert_eq!(path[0].left_col.name, "parent_id");
    }

    #[test]
    fn unreachable_pair_yields_empty_path() {
        let s = SchemaBuilder::new(DbType::Postgres, "public")
            .table(Table::new("public", "a", TableType::Table, vec![pk("id")]))
            .table(Table::new("public", "b", TableType::Table, vec![pk("id")]))
            .build()
            .expect("schema builds");
        assert!(s.find_path("a", "b", None).expect("lookup").is_empty());
    }

    #[test]
    fn inflection_helpers_round_trip() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("address"), "address");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("user"), "users");
    }
}

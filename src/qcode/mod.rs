//! The compiler core and its intermediate representation.
//!
//! A parsed operation plus a role name compiles into a [`QCode`]: a flat,
//! ordered table of schema-bound [`Select`] nodes with filter trees, paging
//! descriptors, ordering, and mutation intent. The SQL renderer consumes
//! QCode as an immutable value; nothing here executes.

pub mod expr;

mod args;
mod compile;
mod cursor;
mod fns;

pub use cursor::CURSOR_ALIAS;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::Result;
use crate::role::{RolePolicy, RoleTableConfig};
use crate::schema::{self, Rel, Schema, Table};
use expr::{Exp, ExpOp};

/// Hard cap on selects per compilation; exceeding it fails the compile.
pub const MAX_SELECTORS: usize = 30;

/// Operation kind, covering both the outer operation type and the mutation
/// sub-kind derived from the root field's arguments.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum QType {
    /// A read-only query.
    Query,
    /// A subscription; compiled like a query.
    Subscription,
    /// A mutation whose sub-kind has not been derived yet.
    Mutation,
    /// Insert mutation.
    Insert,
    /// Update mutation.
    Update,
    /// Upsert mutation.
    Upsert,
    /// Delete mutation.
    Delete,
}

impl QType {
    /// Human-readable operation family, used in policy errors.
    pub fn op_name(self) -> &'static str {
        match self {
            QType::Query => "query",
            QType::Subscription => "subscription",
            QType::Mutation => "mutation",
            QType::Insert => "insert",
            QType::Update => "update",
            QType::Upsert => "upsert",
            QType::Delete => "delete",
        }
    }
}

impl Default for QType {
    fn default() -> Self {
        QType::Query
    }
}

/// Select variant; unions realise polymorphic fragments.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SelType {
    /// An ordinary schema-bound select.
    Plain,
    /// The union root holding fragment members as children.
    Union,
    /// One concrete member of a union.
    Member,
}

impl Default for SelType {
    fn default() -> Self {
        SelType::Plain
    }
}

/// Why a select must be silently dropped from SQL generation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipType {
    /// Rendered normally.
    None,
    /// Requires a user context the current role cannot provide.
    UserNeeded,
    /// Resolved by an external service; rendered as a placeholder.
    Remote,
}

impl Default for SkipType {
    fn default() -> Self {
        SkipType::None
    }
}

/// Pagination style of a select.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PagingType {
    /// Plain limit/offset.
    Offset,
    /// Keyset paging after the cursor row.
    Forward,
    /// Keyset paging before the cursor row.
    Backward,
}

impl Default for PagingType {
    fn default() -> Self {
        PagingType::Offset
    }
}

/// Ordering direction, including null placement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OrderDir {
    Asc,
    Desc,
    AscNullsFirst,
    AscNullsLast,
    DescNullsFirst,
    DescNullsLast,
}

impl Default for OrderDir {
    fn default() -> Self {
        OrderDir::Asc
    }
}

/// One entry of a select's ordering series.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderBy {
    /// Ordering column.
    pub col: schema::Column,
    /// Direction.
    pub dir: OrderDir,
}

/// Paging descriptor. Limits and offsets are either concrete integers or
/// unresolved variable references, never both.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Paging {
    /// Paging style.
    pub typ: PagingType,
    /// Concrete row limit.
    pub limit: i32,
    /// Variable reference overriding the concrete limit.
    pub limit_var: Option<String>,
    /// Concrete row offset.
    pub offset: i32,
    /// Variable reference overriding the concrete offset.
    pub offset_var: Option<String>,
    /// Set when the select pages with an opaque keyset cursor.
    pub cursor: bool,
    /// Policy bypass disabling the limit entirely.
    pub no_limit: bool,
}

/// A projected column with its response name.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// Schema column.
    pub col: schema::Column,
    /// Alias or field name in the response.
    pub field_name: String,
}

/// A selected function: an aggregate or search projection carrying either a
/// local column or a synthetic select for cross-table aggregation.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    /// Function name, e.g. `count` or `search_headline`.
    pub name: String,
    /// Local column argument, when the expression names one.
    pub col: Option<schema::Column>,
    /// Synthetic select over the referenced table, for `_table__column`
    /// cross-table aggregation.
    pub sel: Option<Box<Select>>,
    /// Response field name.
    pub field_name: String,
}

/// Opaque argument value carried through for the renderer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgVal {
    /// Raw value string (literal spelling or variable name).
    pub val: String,
}

/// One row-yielding node of the compiled operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Select {
    /// Dense id; the select's position in [`QCode::selects`].
    pub id: i32,
    /// Parent select id, `-1` for roots.
    pub parent_id: i32,
    /// Select variant.
    pub typ: SelType,
    /// One row expected.
    pub singular: bool,
    /// `__typename` was selected.
    pub typename: bool,
    /// Canonical bound table name, or the field name for remote selects.
    pub table: String,
    /// Alias or field name in the response.
    pub field_name: String,
    /// Projected columns.
    pub cols: Vec<Column>,
    /// Base columns required by joins but not returned.
    pub bcols: Vec<schema::Column>,
    /// Opaque argument carry-through.
    pub arg_map: FxHashMap<String, ArgVal>,
    /// Selected functions.
    pub funcs: Vec<Function>,
    /// Filter expression tree.
    pub filter: Option<Exp>,
    /// Ordering series; most significant first.
    pub order_by: Vec<OrderBy>,
    /// Distinct-on columns (folded into ordering on MySQL).
    pub distinct_on: Vec<schema::Column>,
    /// Aggregates coexist with plain columns; renderer must group.
    pub group_cols: bool,
    /// Paging descriptor.
    pub paging: Paging,
    /// Child select ids in compilation order.
    pub children: SmallVec<[i32; 5]>,
    /// Render-skip reason.
    pub skip_render: SkipType,
    /// Resolved table descriptor.
    pub ti: Table,
    /// Relationship to the parent select.
    pub rel: Rel,
    /// Additional join steps through intermediate tables.
    pub joins: Vec<Rel>,
    /// Preferred join table from `@through`.
    pub through: Option<String>,
    /// Desired cursor direction from `first`/`last`.
    pub(crate) order_dir: OrderDir,
}

impl Select {
    /// Creates a select with its identity and response name set.
    pub(crate) fn new(id: i32, parent_id: i32, field_name: impl Into<String>) -> Self {
        Self {
            id,
            parent_id,
            field_name: field_name.into(),
            ..Self::default()
        }
    }

    /// Adds a projected column, or a base column when `base` is set. Base
    /// columns deduplicate against everything already projected.
    pub(crate) fn add_col(&mut self, col: Column, base: bool) {
        if base {
            self.add_bcol(col.col);
        } else {
            self.cols.push(col);
        }
    }

    /// Adds a join-support column unless it is already projected.
    pub(crate) fn add_bcol(&mut self, col: schema::Column) {
        let dup = self.cols.iter().any(|c| c.col.name == col.name)
            || self.bcols.iter().any(|c| c.name == col.name);
        if !dup {
            self.bcols.push(col);
        }
    }

    /// Registers an opaque argument for carry-through.
    pub(crate) fn add_arg(&mut self, name: impl Into<String>, val: impl Into<String>) {
        self.arg_map.insert(name.into(), ArgVal { val: val.into() });
    }
}

/// Variables flow through by name as raw JSON; the compiler stores
/// references and never resolves values.
pub type Variables = FxHashMap<String, serde_json::Value>;

/// Compiler tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Default schema for unqualified table lookups.
    #[serde(default = "default_db_schema")]
    pub db_schema: String,
    /// Row limit applied when neither the role policy nor the query sets
    /// one; the compiler falls back to 20 when unset.
    #[serde(default)]
    pub default_limit: Option<i32>,
    /// Block tables for roles with no explicit policy.
    #[serde(default)]
    pub default_block: bool,
    /// Infer singularity from field-name inflection.
    #[serde(default = "default_true")]
    pub enable_inflection: bool,
    /// Keyset tie-breaker column overriding the primary key.
    #[serde(default)]
    pub cursor_column: Option<String>,
}

fn default_db_schema() -> String {
    "public".to_owned()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_schema: default_db_schema(),
            default_limit: None,
            default_block: false,
            enable_inflection: true,
            cursor_column: None,
        }
    }
}

/// The compiled artifact handed to the SQL renderer.
#[derive(Clone, Debug)]
pub struct QCode {
    /// Operation kind.
    pub q_type: QType,
    /// Mutation sub-kind; `Query` for plain queries and subscriptions.
    pub s_type: QType,
    /// Variable binding the mutation payload, when any.
    pub action_var: Option<String>,
    /// All selects in compilation order; parents precede children.
    pub selects: Vec<Select>,
    /// Ids of the root selects.
    pub roots: SmallVec<[i32; 5]>,
    /// Raw variables by name.
    pub vars: Variables,
    /// Schema the selects are bound against.
    pub schema: Arc<Schema>,
    /// Number of selects resolving to remote tables.
    pub remotes: i32,
}

/// Compiles parsed operations into [`QCode`].
///
/// A compiler is immutable once its role policies are registered and may be
/// shared freely across threads.
#[derive(Debug)]
pub struct Compiler {
    pub(crate) schema: Arc<Schema>,
    pub(crate) config: Config,
    roles: FxHashMap<String, RolePolicy>,
    default_role: RolePolicy,
}

impl Compiler {
    /// Creates a compiler over a schema.
    pub fn new(schema: Arc<Schema>, config: Config) -> Self {
        let default_role = RolePolicy::with_default_block(config.default_block);
        Self {
            schema,
            config,
            roles: FxHashMap::default(),
            default_role,
        }
    }

    /// Registers the access policy for a (role, table) pair. Baseline
    /// filters compile once here and are reused by every compile.
    pub fn add_role(
        &mut self,
        role: impl Into<String>,
        table: impl Into<String>,
        cfg: RoleTableConfig,
    ) -> Result<()> {
        let role = role.into().to_lowercase();
        let table = table.into().to_lowercase();
        let ti = self.schema.find(&self.config.db_schema, &table)?;
        let policy = RolePolicy::compile(&self.schema, &ti, &cfg)?;
        debug!(%role, %table, "registered role policy");
        self.roles.insert(format!("{role}:{table}"), policy);
        Ok(())
    }

    pub(crate) fn get_role(&self, role: &str, table: &str) -> &RolePolicy {
        self.roles
            .get(&format!("{}:{}", role.to_lowercase(), table.to_lowercase()))
            .unwrap_or(&self.default_role)
    }

    pub(crate) fn add_filters(&self, qc: &QCode, sel: &mut Select, policy: &RolePolicy) -> bool {
        let (fil, needs_user) = policy.filter(qc.s_type);
        if let Some(f) = fil {
            if f.op == ExpOp::False {
                // A denying policy replaces everything else outright.
                sel.filter = Some(f.clone());
            } else {
                expr::set_filter(&mut sel.filter, f.clone());
            }
            return needs_user;
        }
        false
    }

    pub(crate) fn set_limit(&self, policy: &RolePolicy, qc: &QCode, sel: &mut Select) {
        sel.paging.no_limit = policy.no_limit(qc.s_type);
        if let Some(limit) = policy.limit(qc.s_type) {
            sel.paging.limit = limit;
        } else if let Some(limit) = self.config.default_limit {
            sel.paging.limit = limit;
        } else {
            sel.paging.limit = 20;
        }
    }
}

#![forbid(unsafe_code)]

use thiserror::Error;

/// Convenience alias for compiler results.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Structured errors emitted while compiling an operation.
///
/// Every error is fatal to the current compile; there is no partial
/// intermediate representation. Variants map one-to-one onto the failure
/// categories callers need to distinguish: schema resolution, access policy,
/// argument typing, semantic validation, and capacity guardrails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The operation produced no selects at all.
    #[error("invalid query")]
    EmptyQuery,
    /// The select budget was exhausted mid-compile.
    #[error("selector limit reached ({0})")]
    SelectorLimit(usize),
    /// No path connects the two tables in the relationship graph.
    #[error("no relationship found: {child} -> {parent}")]
    NoRelationship { child: String, parent: String },
    /// Referenced table is absent from the schema.
    #[error("table '{0}' not found")]
    TableNotFound(String),
    /// The table is blocked at the schema level.
    #[error("table '{0}' blocked")]
    TableBlocked(String),
    /// The active role forbids this operation on the table.
    #[error("role '{role}' blocked from {op} on table '{table}'")]
    RoleBlocked {
        role: String,
        op: &'static str,
        table: String,
    },
    /// Referenced column is absent from its table.
    #[error("column '{table}.{column}' not found")]
    ColumnNotFound { table: String, column: String },
    /// A foreign key names a table the schema does not contain.
    #[error("foreign key table not found: {schema}.{table}")]
    FkeyTableNotFound { schema: String, table: String },
    /// A foreign key names a column its target table does not contain.
    #[error("foreign key column not found: {table}.{column}")]
    FkeyColumnNotFound { table: String, column: String },
    /// Keyset pagination needs a unique tie-breaker column.
    #[error("no primary key column defined for {0}")]
    NoPrimaryKey(String),
    /// `search` was used against a table without a tsvector column.
    #[error("no tsvector column defined on table '{0}'")]
    NoTsVector(String),
    /// `search` was used against a MySQL table without fulltext indexes.
    #[error("no fulltext indexes defined for table '{0}'")]
    NoFulltextIndex(String),
    /// A search projection was selected without a `search` argument.
    #[error("no search defined: {0}")]
    NoSearchArg(String),
    /// Recursive selectors must say which way to walk.
    #[error("arguments: 'find' needed for recursive queries")]
    FindRequired,
    /// `find` only accepts the two traversal directions.
    #[error("find: valid values are 'parents' and 'children'")]
    FindValues,
    /// `find` is meaningless outside recursive relationships.
    #[error("find: selector '{0}' is not recursive")]
    FindNotRecursive(String),
    /// `id` is shorthand for a primary-key lookup on a root selector.
    #[error("argument 'id' can only be specified at the query root")]
    IdNotRoot,
    /// An argument value had the wrong kind.
    #[error("value for argument '{arg}' must be a {expected}")]
    ArgType { arg: String, expected: &'static str },
    /// An argument value kind is unsupported by the target database.
    #[error("{db}: value for argument '{arg}' must be a {expected}")]
    DbArgType {
        db: &'static str,
        arg: String,
        expected: &'static str,
    },
    /// `after`/`before` must reference the opaque `$cursor` variable.
    #[error("value for argument '{0}' must be a variable named $cursor")]
    CursorVar(String),
    /// A column may appear at most once in an order-by series.
    #[error("duplicate column in order by: {0}")]
    DuplicateOrderBy(String),
    /// An order-by entry used an unknown direction keyword.
    #[error("valid values include asc, desc, asc_nulls_first and desc_nulls_first")]
    OrderDirection,
    /// A directive was missing its required argument.
    #[error("@{directive}: required argument '{arg}' missing")]
    DirectiveArg {
        directive: &'static str,
        arg: &'static str,
    },
    /// Inline union fragments only make sense under a polymorphic parent.
    #[error("union types are only valid with polymorphic relationships")]
    UnionParent,
    /// A filter column was given a value with no recognised operator.
    #[error("expecting an expression operator for column '{0}'")]
    MissingOperator(String),
    /// A filter object used an operator the compiler does not know.
    #[error("unknown expression operator '{0}'")]
    UnknownOperator(String),
    /// A filter object was empty or otherwise produced no expression.
    #[error("empty expression for column '{0}'")]
    EmptyExpression(String),
}

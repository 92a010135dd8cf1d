#![forbid(unsafe_code)]

//! GraphQL-to-SQL query compiler core.
//!
//! `graft` transforms a parsed GraphQL operation plus a runtime role into an
//! intermediate representation ([`QCode`]) ready for SQL generation: a flat,
//! ordered table of selects with resolved schema bindings, filter expression
//! trees, paging descriptors, ordering, and mutation intent. Field nesting
//! becomes join paths discovered over a weighted relationship graph, role
//! policies inject filters and limits, and keyset pagination synthesises
//! tuple-comparison seek predicates.
//!
//! The crate neither parses GraphQL text nor renders or executes SQL; the
//! parser and renderer are external collaborators speaking the types in
//! [`graph`] and [`qcode`]. A [`Compiler`] is immutable once its role
//! policies are registered and is safe to share across threads, as are the
//! [`Schema`] and every compiled [`QCode`].

pub mod error;
pub mod graph;
pub mod qcode;
pub mod role;
pub mod schema;

pub use error::{CompileError, Result};
pub use qcode::{
    Compiler, Config, OrderBy, OrderDir, Paging, PagingType, QCode, QType, SelType, Select,
    SkipType, Variables,
};
pub use role::{OpPolicyConfig, RoleTableConfig};
pub use schema::{
    Column, DbFunction, DbType, ForeignKey, FunctionParam, Schema, SchemaBuilder, Table, TableType,
    VirtualTable,
};

//! Filter expression trees and the builder that produces them from parsed
//! argument objects.
//!
//! Leaves test a column against a classified value; inner nodes are the
//! logical connectives. Values are never resolved: literals keep their raw
//! spelling and variables stay name references for the renderer to bind.

use crate::error::{CompileError, Result};
use crate::graph::Node;
use crate::schema::{Column, Schema, Table};

/// Expression operators. Wire names arrive with or without the leading
/// underscore; both map onto this closed set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ExpOp {
    And,
    Or,
    Not,
    Equals,
    NotEquals,
    GreaterOrEquals,
    LesserOrEquals,
    GreaterThan,
    LesserThan,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    Similar,
    NotSimilar,
    Regex,
    NotRegex,
    IRegex,
    NotIRegex,
    Contains,
    ContainedIn,
    HasKey,
    HasKeyAny,
    HasKeyAll,
    IsNull,
    TsQuery,
    /// Denies every row; produced by a `false` policy filter.
    False,
    /// Render-time test that a variable is true, from `@include`.
    EqualsTrue,
    /// Render-time test that a variable is not true, from `@skip`.
    NotEqualsTrue,
    Distinct,
    NotDistinct,
}

/// Element type of a list value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ValType {
    Str,
    Num,
    Bool,
}

/// Classified right-hand side of an expression leaf.
#[derive(Clone, Debug, PartialEq)]
pub enum ExpVal {
    /// String literal, raw.
    Str(String),
    /// Numeric literal, raw.
    Num(String),
    /// Boolean literal.
    Bool(bool),
    /// Homogeneous list literal for `in`-style operators.
    List {
        /// Element classification.
        elem: ValType,
        /// Raw element spellings.
        items: Vec<String>,
    },
    /// Unresolved variable reference, stored without the sigil.
    Var(String),
    /// Reference to a column of another relation, such as the `__cur`
    /// cursor-row alias used by seek predicates.
    Ref {
        /// Alias of the referenced relation.
        table: String,
        /// Referenced column.
        col: Column,
    },
    /// No right-hand side; connectives and pseudo-operators.
    None,
}

/// One node of a filter expression tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Exp {
    /// Operator.
    pub op: ExpOp,
    /// Column the leaf tests, when any.
    pub col: Option<Column>,
    /// Relationship path from the select's table down to the leaf's table,
    /// for filters addressing joined or embedded relations.
    pub path: Vec<String>,
    /// Classified right-hand side.
    pub val: ExpVal,
    /// Child expressions of connectives.
    pub children: Vec<Exp>,
}

impl Exp {
    /// Builds a leaf node.
    pub(crate) fn leaf(op: ExpOp, col: Option<Column>, val: ExpVal) -> Self {
        Self {
            op,
            col,
            path: Vec::new(),
            val,
            children: Vec::new(),
        }
    }

    /// Builds a connective over the given children.
    pub(crate) fn branch(op: ExpOp, children: Vec<Exp>) -> Self {
        Self {
            op,
            col: None,
            path: Vec::new(),
            val: ExpVal::None,
            children,
        }
    }
}

/// ANDs a new expression into an optional filter slot. The incoming
/// expression becomes the first child so policy filters stay in front of
/// user-supplied conditions.
pub(crate) fn set_filter(filter: &mut Option<Exp>, exp: Exp) {
    *filter = Some(match filter.take() {
        Some(existing) => Exp::branch(ExpOp::And, vec![exp, existing]),
        None => exp,
    });
}

/// Maps a wire operator name onto the internal operator set.
fn parse_op(name: &str) -> Option<ExpOp> {
    Some(match name {
        "eq" | "equals" => ExpOp::Equals,
        "neq" | "not_equals" => ExpOp::NotEquals,
        "gt" | "greater_than" => ExpOp::GreaterThan,
        "lt" | "lesser_than" | "less_than" => ExpOp::LesserThan,
        "gte" | "greater_or_equals" => ExpOp::GreaterOrEquals,
        "lte" | "lesser_or_equals" | "less_or_equals" => ExpOp::LesserOrEquals,
        "in" => ExpOp::In,
        "nin" | "not_in" => ExpOp::NotIn,
        "like" => ExpOp::Like,
        "nlike" | "not_like" => ExpOp::NotLike,
        "ilike" => ExpOp::ILike,
        "nilike" | "not_ilike" => ExpOp::NotILike,
        "similar" => ExpOp::Similar,
        "nsimilar" | "not_similar" => ExpOp::NotSimilar,
        "regex" => ExpOp::Regex,
        "nregex" | "not_regex" => ExpOp::NotRegex,
        "iregex" => ExpOp::IRegex,
        "niregex" | "not_iregex" => ExpOp::NotIRegex,
        "contains" => ExpOp::Contains,
        "contained_in" => ExpOp::ContainedIn,
        "has_key" => ExpOp::HasKey,
        "has_key_any" => ExpOp::HasKeyAny,
        "has_key_all" => ExpOp::HasKeyAll,
        "is_null" => ExpOp::IsNull,
        "ts_query" => ExpOp::TsQuery,
        "distinct" => ExpOp::Distinct,
        "nodistinct" | "not_distinct" => ExpOp::NotDistinct,
        _ => return None,
    })
}

/// Session variables that imply a user context is required.
fn is_user_var(name: &str) -> bool {
    matches!(name, "user" | "user_id" | "user_id_provider" | "user_id_raw")
}

/// Compiles a `where`-style argument object into an expression tree.
///
/// The boolean result reports whether the tree references a session user
/// variable, directly or through nested objects; anonymous-role handling
/// keys off it.
pub(crate) fn compile_filter_obj(
    schema: &Schema,
    table: &Table,
    node: &Node,
) -> Result<(Exp, bool)> {
    let mut needs_user = false;
    let exp = compile_table_node(schema, table, node, &[], &mut needs_user)?;
    Ok((exp, needs_user))
}

fn compile_table_node(
    schema: &Schema,
    table: &Table,
    node: &Node,
    path: &[String],
    needs_user: &mut bool,
) -> Result<Exp> {
    let Node::Obj(entries) = node else {
        return Err(CompileError::ArgType {
            arg: "where".to_owned(),
            expected: "object",
        });
    };
    if entries.is_empty() {
        return Err(CompileError::EmptyExpression(table.name.clone()));
    }
    let mut children = Vec::with_capacity(entries.len());
    for (key, val) in entries {
        children.push(compile_table_entry(schema, table, key, val, path, needs_user)?);
    }
    Ok(collapse(ExpOp::And, children))
}

fn compile_table_entry(
    schema: &Schema,
    table: &Table,
    key: &str,
    val: &Node,
    path: &[String],
    needs_user: &mut bool,
) -> Result<Exp> {
    match key.strip_prefix('_').unwrap_or(key) {
        "and" | "or" => {
            let op = if key.ends_with("and") {
                ExpOp::And
            } else {
                ExpOp::Or
            };
            let children = match val {
                Node::List(items) => items
                    .iter()
                    .map(|n| compile_table_node(schema, table, n, path, needs_user))
                    .collect::<Result<Vec<_>>>()?,
                Node::Obj(entries) => entries
                    .iter()
                    .map(|(k, v)| compile_table_entry(schema, table, k, v, path, needs_user))
                    .collect::<Result<Vec<_>>>()?,
                _ => {
                    return Err(CompileError::ArgType {
                        arg: key.to_owned(),
                        expected: "list or object",
                    })
                }
            };
            if children.is_empty() {
                return Err(CompileError::EmptyExpression(table.name.clone()));
            }
            Ok(collapse(op, children))
        }
        "not" => Ok(Exp::branch(
            ExpOp::Not,
            vec![compile_table_node(schema, table, val, path, needs_user)?],
        )),
        _ => {
            if let Some(col) = table.column(key) {
                return compile_col_node(col.clone(), val, path, needs_user);
            }
            // Not a local column: try following a relationship edge so
            // nested objects can filter on joined or embedded tables.
            let rel_path = schema.find_path(key, &table.name, None).ok().filter(|p| !p.is_empty());
            match rel_path {
                Some(edges) => {
                    let nested = edges[0].left_table.clone();
                    let mut npath = path.to_vec();
                    npath.push(key.to_owned());
                    compile_table_node(schema, &nested, val, &npath, needs_user)
                }
                None => Err(CompileError::ColumnNotFound {
                    table: table.name.clone(),
                    column: key.to_owned(),
                }),
            }
        }
    }
}

fn compile_col_node(
    col: Column,
    val: &Node,
    path: &[String],
    needs_user: &mut bool,
) -> Result<Exp> {
    let Node::Obj(entries) = val else {
        return Err(CompileError::MissingOperator(col.name.clone()));
    };
    if entries.is_empty() {
        return Err(CompileError::EmptyExpression(col.name.clone()));
    }
    let mut children = Vec::with_capacity(entries.len());
    for (op_key, operand) in entries {
        let norm = op_key.strip_prefix('_').unwrap_or(op_key);
        let Some(op) = parse_op(norm) else {
            return Err(CompileError::UnknownOperator(op_key.clone()));
        };
        let mut leaf = Exp::leaf(op, Some(col.clone()), classify_value(operand, needs_user)?);
        leaf.path = path.to_vec();
        children.push(leaf);
    }
    Ok(collapse(ExpOp::And, children))
}

fn classify_value(node: &Node, needs_user: &mut bool) -> Result<ExpVal> {
    Ok(match node {
        Node::Str(s) => ExpVal::Str(s.clone()),
        Node::Num(s) => ExpVal::Num(s.clone()),
        Node::Bool(b) => ExpVal::Bool(*b),
        Node::Var(name) => {
            if is_user_var(name) {
                *needs_user = true;
            }
            ExpVal::Var(name.clone())
        }
        Node::List(items) => {
            let elem = match items.first() {
                Some(Node::Num(_)) => ValType::Num,
                Some(Node::Bool(_)) => ValType::Bool,
                _ => ValType::Str,
            };
            let items = items
                .iter()
                .map(|n| match n {
                    Node::Str(s) | Node::Num(s) => Ok(s.clone()),
                    Node::Bool(b) => Ok(b.to_string()),
                    _ => Err(CompileError::ArgType {
                        arg: "where".to_owned(),
                        expected: "list of scalars",
                    }),
                })
                .collect::<Result<Vec<_>>>()?;
            ExpVal::List { elem, items }
        }
        Node::Obj(_) => {
            return Err(CompileError::ArgType {
                arg: "where".to_owned(),
                expected: "scalar, list or variable",
            })
        }
    })
}

fn collapse(op: ExpOp, mut children: Vec<Exp>) -> Exp {
    if children.len() == 1 {
        children.remove(0)
    } else {
        Exp::branch(op, children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DbType, ForeignKey, SchemaBuilder, TableType};

    fn schema() -> Schema {
        SchemaBuilder::new(DbType::Postgres, "public")
            .table(Table::new(
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
                        name: "name".into(),
                        ..Column::default()
                    },
                ],
            ))
            .table(Table::new(
                "public",
                "posts",
                TableType::Table,
                vec![
                    Column {
                        name: "id".into(),
                        primary_key: true,
                        unique_key: true,
                        ..Column::default()
                    },
                    Column {
                        name: "title".into(),
                        ..Column::default()
                    },
                    Column {
                        name: "user_id".into(),
                        fkey: Some(ForeignKey {
                            schema: String::new(),
                            table: "users".into(),
                            column: "id".into(),
                        }),
                        ..Column::default()
                    },
                ],
            ))
            .build()
            .expect("schema builds")
    }

    #[test]
    fn simple_operator_builds_a_leaf() {
        let s = schema();
        let users = s.find("public", "users").expect("table");
        let node = Node::obj([("name", Node::obj([("eq", Node::str("ada"))]))]);
        let (exp, nu) = compile_filter_obj(&s, &users, &node).expect("compiles");
        assert!(!nu);
        assert_eq!(exp.op, ExpOp::Equals);
        assert_eq!(exp.col.as_ref().map(|c| c.name.as_str()), Some("name"));
        assert_eq!(exp.val, ExpVal::Str("ada".into()));
    }

    #[test]
    fn sibling_keys_imply_and() {
        let s = schema();
        let users = s.find("public", "users").expect("table");
        let node = Node::obj([
            ("id", Node::obj([("gt", Node::num("1"))])),
            ("name", Node::obj([("like", Node::str("a%"))])),
        ]);
        let (exp, _) = compile_filter_obj(&s, &users, &node).expect("compiles");
        assert_eq!(exp.op, ExpOp::And);
        assert_eq!(exp.children.len(), 2);
    }

    #[test]
    fn logical_connectives_nest() {
        let s = schema();
        let users = s.find("public", "users").expect("table");
        let node = Node::obj([(
            "_or",
            Node::list([
                Node::obj([("id", Node::obj([("eq", Node::num("1"))]))]),
                Node::obj([("_not", Node::obj([("name", Node::obj([("is_null", Node::bool(true))]))]))]),
            ]),
        )]);
        let (exp, _) = compile_filter_obj(&s, &users, &node).expect("compiles");
        assert_eq!(exp.op, ExpOp::Or);
        assert_eq!(exp.children[1].op, ExpOp::Not);
        assert_eq!(exp.children[1].children[0].op, ExpOp::IsNull);
    }

    #[test]
    fn user_variables_flag_needs_user() {
        let s = schema();
        let users = s.find("public", "users").expect("table");
        let node = Node::obj([("id", Node::obj([("eq", Node::var("user_id"))]))]);
        let (exp, nu) = compile_filter_obj(&s, &users, &node).expect("compiles");
        assert!(nu);
        assert_eq!(exp.val, ExpVal::Var("user_id".into()));
    }

    #[test]
    fn nested_relationship_filters_carry_a_path() {
        let s = schema();
        let users = s.find("public", "users").expect("table");
        let node = Node::obj([(
            "posts",
            Node::obj([("title", Node::obj([("eq", Node::str("intro"))]))]),
        )]);
        let (exp, _) = compile_filter_obj(&s, &users, &node).expect("compiles");
        assert_eq!(exp.op, ExpOp::Equals);
        assert_eq!(exp.path, vec!["posts".to_owned()]);
        assert_eq!(exp.col.as_ref().map(|c| c.table.as_str()), Some("posts"));
    }

    #[test]
    fn in_lists_classify_their_elements() {
        let s = schema();
        let users = s.find("public", "users").expect("table");
        let node = Node::obj([(
            "id",
            Node::obj([("in", Node::list([Node::num("1"), Node::num("2")]))]),
        )]);
        let (exp, _) = compile_filter_obj(&s, &users, &node).expect("compiles");
        assert_eq!(exp.op, ExpOp::In);
        assert_eq!(
            exp.val,
            ExpVal::List {
                elem: ValType::Num,
                items: vec!["1".into(), "2".into()],
            }
        );
    }

    #[test]
    fn missing_and_unknown_operators_are_errors() {
        let s = schema();
        let users = s.find("public", "users").expect("table");

        let bare = Node::obj([("name", Node::str("ada"))]);
        assert_eq!(
            compile_filter_obj(&s, &users, &bare).unwrap_err(),
            CompileError::MissingOperator("name".into())
        );

        let unknown = Node::obj([("name", Node::obj([("resembles", Node::str("ada"))]))]);
        assert_eq!(
            compile_filter_obj(&s, &users, &unknown).unwrap_err(),
            CompileError::UnknownOperator("resembles".into())
        );
    }

    #[test]
    fn set_filter_wraps_existing_in_and() {
        let mut slot = Some(Exp::leaf(ExpOp::Equals, None, ExpVal::Num("1".into())));
        set_filter(
            &mut slot,
            Exp::leaf(ExpOp::Equals, None, ExpVal::Num("2".into())),
        );
        let exp = slot.expect("filter present");
        assert_eq!(exp.op, ExpOp::And);
        assert_eq!(exp.children[0].val, ExpVal::Num("2".into()));
        assert_eq!(exp.children[1].val, ExpVal::Num("1".into()));
    }
}

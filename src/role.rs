//! Role-based access policies.
//!
//! A policy is keyed by (role, table) and split per operation family:
//! query, insert, update, upsert, and delete each carry their own block
//! bit, baseline filter, row limit, and render-skip rule. Baseline filters
//! are declared as JSON trees, compiled once at registration time, and
//! reused by every compile; the registry is read-only afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CompileError, Result};
use crate::graph::Node;
use crate::qcode::expr::{compile_filter_obj, Exp, ExpOp, ExpVal};
use crate::qcode::QType;
use crate::schema::{Schema, Table};

/// Declarative policy for one operation family on one table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OpPolicyConfig {
    /// Baseline filters ANDed into every matching select. The literal
    /// `false` denies all rows outright.
    #[serde(default)]
    pub filters: Vec<Value>,
    /// Row limit override.
    #[serde(default)]
    pub limit: Option<i32>,
    /// Disable the row limit entirely.
    #[serde(default)]
    pub no_limit: bool,
    /// Forbid the operation; compiles fail.
    #[serde(default)]
    pub block: bool,
    /// Drop matching selects from rendering instead of failing.
    #[serde(default)]
    pub skip: bool,
}

/// Declarative access policy for one (role, table) pair.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoleTableConfig {
    /// Policy for queries and subscriptions.
    #[serde(default)]
    pub query: OpPolicyConfig,
    /// Policy for insert mutations.
    #[serde(default)]
    pub insert: OpPolicyConfig,
    /// Policy for update mutations.
    #[serde(default)]
    pub update: OpPolicyConfig,
    /// Policy for upsert mutations.
    #[serde(default)]
    pub upsert: OpPolicyConfig,
    /// Policy for delete mutations.
    #[serde(default)]
    pub delete: OpPolicyConfig,
}

/// A compiled operation-family policy.
#[derive(Clone, Debug, Default)]
pub(crate) struct OpPolicy {
    filter: Option<Exp>,
    needs_user: bool,
    limit: Option<i32>,
    no_limit: bool,
    block: bool,
    skip: bool,
}

impl OpPolicy {
    fn compile(schema: &Schema, table: &Table, cfg: &OpPolicyConfig) -> Result<Self> {
        let mut policy = OpPolicy {
            limit: cfg.limit,
            no_limit: cfg.no_limit,
            block: cfg.block,
            skip: cfg.skip,
            ..OpPolicy::default()
        };

        for raw in &cfg.filters {
            if matches!(raw, Value::Bool(false)) {
                policy.filter = Some(Exp::leaf(ExpOp::False, None, ExpVal::None));
                policy.needs_user = false;
                return Ok(policy);
            }
            let node = node_from_json(raw);
            let (exp, needs_user) = compile_filter_obj(schema, table, &node)?;
            policy.needs_user |= needs_user;
            policy.filter = Some(match policy.filter.take() {
                Some(existing) => Exp::branch(ExpOp::And, vec![existing, exp]),
                None => exp,
            });
        }
        Ok(policy)
    }

    fn blocked(b: bool) -> Self {
        OpPolicy {
            block: b,
            ..OpPolicy::default()
        }
    }
}

/// Compiled access policy across all five operation families.
#[derive(Clone, Debug, Default)]
pub(crate) struct RolePolicy {
    query: OpPolicy,
    insert: OpPolicy,
    update: OpPolicy,
    upsert: OpPolicy,
    delete: OpPolicy,
}

impl RolePolicy {
    /// Fallback policy for (role, table) pairs with no registration.
    pub(crate) fn with_default_block(block: bool) -> Self {
        RolePolicy {
            query: OpPolicy::blocked(block),
            insert: OpPolicy::blocked(block),
            update: OpPolicy::blocked(block),
            upsert: OpPolicy::blocked(block),
            delete: OpPolicy::blocked(block),
        }
    }

    /// Compiles a declarative table policy, memoising its filters.
    pub(crate) fn compile(schema: &Schema, table: &Table, cfg: &RoleTableConfig) -> Result<Self> {
        Ok(RolePolicy {
            query: OpPolicy::compile(schema, table, &cfg.query)?,
            insert: OpPolicy::compile(schema, table, &cfg.insert)?,
            update: OpPolicy::compile(schema, table, &cfg.update)?,
            upsert: OpPolicy::compile(schema, table, &cfg.upsert)?,
            delete: OpPolicy::compile(schema, table, &cfg.delete)?,
        })
    }

    fn op(&self, st: QType) -> &OpPolicy {
        match st {
            QType::Insert => &self.insert,
            QType::Update => &self.update,
            QType::Upsert => &self.upsert,
            QType::Delete => &self.delete,
            _ => &self.query,
        }
    }

    /// True when matching selects must be dropped from rendering.
    pub(crate) fn is_skipped(&self, st: QType) -> bool {
        self.op(st).skip
    }

    /// Fails the compile when the operation is forbidden for the role.
    pub(crate) fn is_blocked(&self, st: QType, role: &str, table: &str) -> Result<()> {
        if self.op(st).block {
            return Err(CompileError::RoleBlocked {
                role: role.to_owned(),
                op: st.op_name(),
                table: table.to_owned(),
            });
        }
        Ok(())
    }

    /// Baseline filter and whether it references the session user.
    pub(crate) fn filter(&self, st: QType) -> (Option<&Exp>, bool) {
        let op = self.op(st);
        (op.filter.as_ref(), op.needs_user)
    }

    /// Row limit override, when any.
    pub(crate) fn limit(&self, st: QType) -> Option<i32> {
        self.op(st).limit
    }

    /// Whether the limit is bypassed entirely.
    pub(crate) fn no_limit(&self, st: QType) -> bool {
        self.op(st).no_limit
    }
}

/// Converts a JSON policy filter into the parser's argument-node shape.
/// Strings with a `$` sigil become variable references.
fn node_from_json(value: &Value) -> Node {
    match value {
        Value::Null => Node::Str("null".to_owned()),
        Value::Bool(b) => Node::Bool(*b),
        Value::Number(n) => Node::Num(n.to_string()),
        Value::String(s) => match s.strip_prefix('$') {
            Some(var) => Node::Var(var.to_owned()),
            None => Node::Str(s.clone()),
        },
        Value::Array(items) => Node::List(items.iter().map(node_from_json).collect()),
        Value::Object(entries) => Node::Obj(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), node_from_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, DbType, SchemaBuilder, TableType};
    use serde_json::json;

    fn schema() -> Schema {
        SchemaBuilder::new(DbType::Postgres, "public")
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
                        name: "owner_id".into(),
                        ..Column::default()
                    },
                ],
            ))
            .build()
            .expect("schema builds")
    }

    #[test]
    fn filters_compile_once_and_flag_user_references() {
        let s = schema();
        let posts = s.find("public", "posts").expect("table");
        let cfg = RoleTableConfig {
            query: OpPolicyConfig {
                filters: vec![json!({ "owner_id": { "eq": "$user_id" } })],
                limit: Some(5),
                ..OpPolicyConfig::default()
            },
            ..RoleTableConfig::default()
        };
        let policy = RolePolicy::compile(&s, &posts, &cfg).expect("policy compiles");

        let (filter, needs_user) = policy.filter(QType::Query);
        assert!(needs_user);
        let exp = filter.expect("filter present");
        assert_eq!(exp.op, ExpOp::Equals);
        assert_eq!(exp.val, ExpVal::Var("user_id".into()));
        assert_eq!(policy.limit(QType::Query), Some(5));
        assert_eq!(policy.filter(QType::Delete).0, None);
    }

    #[test]
    fn false_filter_denies_all_rows() {
        let s = schema();
        let posts = s.find("public", "posts").expect("table");
        let cfg = RoleTableConfig {
            delete: OpPolicyConfig {
                filters: vec![json!(false)],
                ..OpPolicyConfig::default()
            },
            ..RoleTableConfig::default()
        };
        let policy = RolePolicy::compile(&s, &posts, &cfg).expect("policy compiles");
        let (filter, needs_user) = policy.filter(QType::Delete);
        assert!(!needs_user);
        assert_eq!(filter.expect("filter present").op, ExpOp::False);
    }

    #[test]
    fn blocked_operations_fail_with_role_context() {
        let s = schema();
        let posts = s.find("public", "posts").expect("table");
        let cfg = RoleTableConfig {
            insert: OpPolicyConfig {
                block: true,
                ..OpPolicyConfig::default()
            },
            ..RoleTableConfig::default()
        };
        let policy = RolePolicy::compile(&s, &posts, &cfg).expect("policy compiles");
        assert!(policy.is_blocked(QType::Query, "anon", "posts").is_ok());
        let err = policy
            .is_blocked(QType::Insert, "anon", "posts")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "role 'anon' blocked from insert on table 'posts'"
        );
    }
}

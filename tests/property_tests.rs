//! Property tests over randomly shaped operations: structural invariants of
//! the compiled select table, determinism, and filter-combination laws.

use std::sync::Arc;

use proptest::prelude::*;

use graft::graph::{field, FieldBuilder, Node, OperationBuilder};
use graft::qcode::expr::ExpOp;
use graft::role::{OpPolicyConfig, RoleTableConfig};
use graft::schema::{Column, DbType, ForeignKey, RelType, Schema, SchemaBuilder, Table, TableType};
use graft::{Compiler, Config, Variables};
use serde_json::json;

fn pk(name: &str) -> Column {
    Column {
        name: name.into(),
        primary_key: true,
        unique_key: true,
        ..Column::default()
    }
}

fn col(name: &str) -> Column {
    Column {
        name: name.into(),
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

fn build_schema() -> Arc<Schema> {
    let schema = SchemaBuilder::new(DbType::Postgres, "public")
        .table(Table::new(
            "public",
            "users",
            TableType::Table,
            vec![pk("id"), col("name"), col("email")],
        ))
        .table(Table::new(
            "public",
            "posts",
            TableType::Table,
            vec![pk("id"), col("title"), col("views"), fk("owner_id", "users", "id")],
        ))
        .table(Table::new(
            "public",
            "products",
            TableType::Table,
            vec![pk("id"), col("name"), col("price"), fk("owner_id", "users", "id")],
        ))
        .table(Table::new(
            "public",
            "comments",
            TableType::Table,
            vec![
                pk("id"),
                col("body"),
                fk("post_id", "posts", "id"),
                fk("commenter_id", "users", "id"),
            ],
        ))
        .table(Table::new(
            "public",
            "payments",
            TableType::Remote,
            vec![
                Column {
                    name: "customer_id".into(),
                    primary_key: true,
                    fkey: Some(ForeignKey {
                        schema: String::new(),
                        table: "users".into(),
                        column: "id".into(),
                    }),
                    ..Column::default()
                },
                col("amount"),
            ],
        ))
        .build()
        .expect("schema builds");
    Arc::new(schema)
}

fn compiler() -> Compiler {
    Compiler::new(build_schema(), Config::default())
}

fn cols_of(name: &str) -> &'static [&'static str] {
    match name {
        "users" | "user" => &["id", "name", "email"],
        "posts" | "post" => &["id", "title", "views"],
        "products" => &["id", "name", "price"],
        "comments" => &["id", "body"],
        "payments" => &["amount"],
        _ => &[],
    }
}

fn rels_of(name: &str) -> &'static [&'static str] {
    match name {
        "users" | "user" => &["posts", "products", "payments"],
        "posts" | "post" => &["user", "comments"],
        "products" => &["user"],
        "comments" => &["user", "post"],
        _ => &[],
    }
}

#[derive(Clone, Debug)]
struct FieldSpec {
    name: &'static str,
    cols: Vec<&'static str>,
    children: Vec<FieldSpec>,
}

fn arb_spec(name: &'static str, depth: u32) -> BoxedStrategy<FieldSpec> {
    let all = cols_of(name);
    let cols = proptest::sample::subsequence(all.to_vec(), 1..=all.len());
    let rels = rels_of(name);
    if depth == 0 || rels.is_empty() {
        cols.prop_map(move |cols| FieldSpec {
            name,
            cols,
            children: Vec::new(),
        })
        .boxed()
    } else {
        let children = prop::collection::vec(
            proptest::sample::select(rels.to_vec())
                .prop_flat_map(move |rel| arb_spec(rel, depth - 1)),
            0..=2,
        );
        (cols, children)
            .prop_map(move |(cols, children)| FieldSpec {
                name,
                cols,
                children,
            })
            .boxed()
    }
}

fn arb_root() -> BoxedStrategy<FieldSpec> {
    proptest::sample::select(vec!["users", "posts", "products", "comments"])
        .prop_flat_map(|root| arb_spec(root, 2))
        .boxed()
}

fn to_field(spec: &FieldSpec) -> FieldBuilder {
    let mut fb = field(spec.name);
    for c in &spec.cols {
        fb = fb.child(field(*c));
    }
    for child in &spec.children {
        fb = fb.child(to_field(child));
    }
    fb
}

proptest! {
    /// Parents always precede their children, and the child-id lists agree
    /// with the parent-id links.
    #[test]
    fn prop_selects_are_topologically_ordered(spec in arb_root()) {
        let co = compiler();
        let op = OperationBuilder::query().root(to_field(&spec)).build();
        let qc = co.compile(&op, Variables::default(), "user").expect("compiles");

        for sel in &qc.selects {
            if sel.parent_id == -1 {
                prop_assert!(qc.roots.contains(&sel.id));
                continue;
            }
            prop_assert!(sel.parent_id < sel.id);
            let parent = &qc.selects[sel.parent_id as usize];
            prop_assert!(parent.children.contains(&sel.id));
        }
    }

    /// The remote counter always matches the remote-typed selects.
    #[test]
    fn prop_remote_counter_matches_selects(spec in arb_root()) {
        let co = compiler();
        let op = OperationBuilder::query().root(to_field(&spec)).build();
        let qc = co.compile(&op, Variables::default(), "user").expect("compiles");

        let remotes = qc
            .selects
            .iter()
            .filter(|s| s.rel.rel_type == RelType::Remote)
            .count() as i32;
        prop_assert_eq!(qc.remotes, remotes);
    }

    /// Compiling the same (operation, role) pair twice yields identical
    /// select tables.
    #[test]
    fn prop_compilation_is_deterministic(spec in arb_root()) {
        let co = compiler();
        let op = OperationBuilder::query().root(to_field(&spec)).build();

        let a = co.compile(&op, Variables::default(), "user").expect("compiles");
        let b = co.compile(&op, Variables::default(), "user").expect("compiles");
        prop_assert_eq!(format!("{:?}", a.selects), format!("{:?}", b.selects));
        prop_assert_eq!(a.roots.as_slice(), b.roots.as_slice());
    }

    /// Keyset paging always ends the order series with the unique
    /// tie-breaker column.
    #[test]
    fn prop_cursor_order_ends_with_unique_column(
        limit in 1i32..50,
        last in proptest::bool::ANY,
        order_col in proptest::sample::select(vec![None, Some("name"), Some("price")]),
    ) {
        let co = compiler();
        let mut root = field("products")
            .arg(if last { "last" } else { "first" }, Node::num(limit.to_string()))
            .child(field("id"));
        if let Some(col) = order_col {
            root = root.arg("order_by", Node::obj([(col, Node::str("desc"))]));
        }
        let op = OperationBuilder::query().root(root).build();
        let qc = co.compile(&op, Variables::default(), "user").expect("compiles");

        let sel = &qc.selects[0];
        prop_assert!(sel.paging.cursor);
        prop_assert_eq!(sel.paging.limit, limit);
        let tie = sel.order_by.last().expect("order series is non-empty");
        prop_assert_eq!(tie.col.name.as_str(), "id");
        prop_assert!(tie.col.unique_key);
    }

    /// A role's baseline filter is always ANDed in front of the
    /// user-supplied condition.
    #[test]
    fn prop_baseline_filter_wraps_where(title in "[a-z]{1,8}") {
        let mut co = compiler();
        co.add_role(
            "user",
            "posts",
            RoleTableConfig {
                query: OpPolicyConfig {
                    filters: vec![json!({ "owner_id": { "eq": "$user_id" } })],
                    ..OpPolicyConfig::default()
                },
                ..RoleTableConfig::default()
            },
        )
        .expect("role registers");

        let op = OperationBuilder::query()
            .root(
                field("posts")
                    .arg(
                        "where",
                        Node::obj([("title", Node::obj([("eq", Node::Str(title.clone()))]))]),
                    )
                    .child(field("id")),
            )
            .build();
        let qc = co.compile(&op, Variables::default(), "user").expect("compiles");

        let root = qc.selects[0].filter.as_ref().expect("combined filter");
        prop_assert_eq!(root.op, ExpOp::And);
        prop_assert_eq!(
            root.children[0].col.as_ref().map(|c| c.name.as_str()),
            Some("owner_id")
        );
        prop_assert_eq!(
            root.children[1].col.as_ref().map(|c| c.name.as_str()),
            Some("title")
        );
    }

    /// `@skip(if: $v)` and `@include(if: $v)` compile to dual operators
    /// over the same variable.
    #[test]
    fn prop_skip_include_duality(var in "[a-z][a-z_]{0,9}") {
        let co = compiler();
        let skip_op = OperationBuilder::query()
            .root(
                field("users")
                    .directive("skip", [("if", Node::Var(var.clone()))])
                    .child(field("id")),
            )
            .build();
        let include_op = OperationBuilder::query()
            .root(
                field("users")
                    .directive("include", [("if", Node::Var(var.clone()))])
                    .child(field("id")),
            )
            .build();

        let skip = co.compile(&skip_op, Variables::default(), "user").expect("compiles");
        let include = co.compile(&include_op, Variables::default(), "user").expect("compiles");

        let s = skip.selects[0].filter.as_ref().expect("skip filter");
        let i = include.selects[0].filter.as_ref().expect("include filter");
        prop_assert_eq!(s.op, ExpOp::NotEqualsTrue);
        prop_assert_eq!(i.op, ExpOp::EqualsTrue);
        prop_assert_eq!(&s.val, &i.val);
    }
}

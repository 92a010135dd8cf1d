//! Fluent construction of parsed operations.
//!
//! Production deployments receive [`Operation`] values from the GraphQL
//! parser; tests and embedders build them programmatically with this module.
//! The builder keeps a nested field tree and flattens it on
//! [`OperationBuilder::build`], assigning dense ids in document (depth-first,
//! pre-order) order exactly as a parser would.

use super::{Arg, Directive, Field, FieldType, Node, OpType, Operation};

/// Starts a field description for [`OperationBuilder`].
pub fn field(name: impl Into<String>) -> FieldBuilder {
    FieldBuilder::new(name)
}

/// Builder for one field and its sub-selections.
#[derive(Clone, Debug)]
pub struct FieldBuilder {
    name: String,
    alias: Option<String>,
    typ: FieldType,
    args: Vec<Arg>,
    directives: Vec<Directive>,
    children: Vec<FieldBuilder>,
}

impl FieldBuilder {
    /// Creates a plain field with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            typ: FieldType::Plain,
            args: Vec::new(),
            directives: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Sets the response alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Marks the field as a union selection.
    pub fn union(mut self) -> Self {
        self.typ = FieldType::Union;
        self
    }

    /// Marks the field as an inline fragment member.
    pub fn member(mut self) -> Self {
        self.typ = FieldType::Member;
        self
    }

    /// Marks the field as a reserved keyword selection.
    pub fn keyword(mut self) -> Self {
        self.typ = FieldType::Keyword;
        self
    }

    /// Appends an argument.
    pub fn arg(mut self, name: impl Into<String>, val: Node) -> Self {
        self.args.push(Arg {
            name: name.into(),
            val,
        });
        self
    }

    /// Appends a directive with its arguments.
    pub fn directive(
        mut self,
        name: impl Into<String>,
        args: impl IntoIterator<Item = (&'static str, Node)>,
    ) -> Self {
        self.directives.push(Directive {
            name: name.into(),
            args: args
                .into_iter()
                .map(|(name, val)| Arg {
                    name: name.to_owned(),
                    val,
                })
                .collect(),
        });
        self
    }

    /// Appends a sub-selection.
    pub fn child(mut self, child: FieldBuilder) -> Self {
        self.children.push(child);
        self
    }

    /// Appends several sub-selections at once.
    pub fn children(mut self, children: impl IntoIterator<Item = FieldBuilder>) -> Self {
        self.children.extend(children);
        self
    }
}

/// Builds a flattened [`Operation`] from nested field descriptions.
#[derive(Clone, Debug)]
pub struct OperationBuilder {
    op_type: OpType,
    name: Option<String>,
    roots: Vec<FieldBuilder>,
}

impl OperationBuilder {
    /// Starts a query operation.
    pub fn query() -> Self {
        Self::with_type(OpType::Query)
    }

    /// Starts a subscription operation.
    pub fn subscription() -> Self {
        Self::with_type(OpType::Subscription)
    }

    /// Starts a mutation operation.
    pub fn mutation() -> Self {
        Self::with_type(OpType::Mutation)
    }

    fn with_type(op_type: OpType) -> Self {
        Self {
            op_type,
            name: None,
            roots: Vec::new(),
        }
    }

    /// Names the operation.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends a root field.
    pub fn root(mut self, root: FieldBuilder) -> Self {
        self.roots.push(root);
        self
    }

    /// Flattens the field tree into a dense, id-indexed operation.
    pub fn build(self) -> Operation {
        let mut fields = Vec::new();
        for root in self.roots {
            flatten(root, -1, &mut fields);
        }
        Operation {
            op_type: self.op_type,
            name: self.name,
            fields,
        }
    }
}

fn flatten(fb: FieldBuilder, parent_id: i32, out: &mut Vec<Field>) -> i32 {
    let id = out.len() as i32;
    out.push(Field {
        id,
        parent_id,
        typ: fb.typ,
        name: fb.name,
        alias: fb.alias,
        args: fb.args,
        directives: fb.directives,
        children: Vec::new(),
    });
    for child in fb.children {
        let cid = flatten(child, id, out);
        out[id as usize].children.push(cid);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_assigns_preorder_ids() {
        let op = OperationBuilder::query()
            .root(
                field("users")
                    .child(field("id"))
                    .child(field("posts").child(field("title"))),
            )
            .root(field("tags").child(field("name")))
            .build();

        let names: Vec<&str> = op.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["users", "id", "posts", "title", "tags", "name"]);
        assert_eq!(op.fields[0].children, vec![1, 2]);
        assert_eq!(op.fields[2].children, vec![3]);
        assert_eq!(op.fields[2].parent_id, 0);
        assert_eq!(op.fields[4].parent_id, -1);
        assert_eq!(op.roots().count(), 2);
    }

    #[test]
    fn builder_keeps_args_and_directives() {
        let op = OperationBuilder::query()
            .root(
                field("users")
                    .alias("members")
                    .arg("limit", Node::num("5"))
                    .directive("object", [])
                    .child(field("id")),
            )
            .build();

        let root = &op.fields[0];
        assert_eq!(root.output_name(), "members");
        assert_eq!(root.args[0].name, "limit");
        assert_eq!(root.args[0].val, Node::num("5"));
        assert_eq!(root.directives[0].name, "object");
    }
}

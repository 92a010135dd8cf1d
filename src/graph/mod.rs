//! Parsed-operation contract shared with the upstream GraphQL parser.
//!
//! The compiler never parses GraphQL text itself; it consumes the flat field
//! table a parser produces. The structures here are intentionally close to
//! the parser's wire shape: fields carry dense ids and parent ids, argument
//! values arrive as untyped [`Node`] trees, and variables stay unresolved
//! references throughout.

/// Fluent construction of [`Operation`] values.
pub mod builder;

pub use builder::{field, FieldBuilder, OperationBuilder};

/// Operation kind reported by the parser.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OpType {
    /// A read-only query.
    Query,
    /// A subscription; compiled like a query, dispatched elsewhere.
    Subscription,
    /// A mutation; the root field's arguments select the sub-kind.
    Mutation,
}

/// Shape of a single parsed field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldType {
    /// An ordinary field selection.
    Plain,
    /// A field whose children are inline union fragments.
    Union,
    /// One inline fragment member under a union field.
    Member,
    /// A reserved keyword field such as a root-level `_cursor` projection.
    Keyword,
}

impl Default for FieldType {
    fn default() -> Self {
        FieldType::Plain
    }
}

/// An argument value as delivered by the parser.
///
/// Numbers stay raw strings: the compiler classifies values but never
/// resolves them, so there is no reason to lose the literal spelling.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// String literal.
    Str(String),
    /// Numeric literal, kept verbatim.
    Num(String),
    /// Boolean literal.
    Bool(bool),
    /// List of values.
    List(Vec<Node>),
    /// Object; entries keep declared order.
    Obj(Vec<(String, Node)>),
    /// A `$name` variable reference, stored without the sigil.
    Var(String),
}

impl Node {
    /// Builds a string node.
    pub fn str(v: impl Into<String>) -> Self {
        Node::Str(v.into())
    }

    /// Builds a numeric node from its literal spelling.
    pub fn num(v: impl Into<String>) -> Self {
        Node::Num(v.into())
    }

    /// Builds a boolean node.
    pub fn bool(v: bool) -> Self {
        Node::Bool(v)
    }

    /// Builds a variable reference node.
    pub fn var(name: impl Into<String>) -> Self {
        Node::Var(name.into())
    }

    /// Builds a list node.
    pub fn list(items: impl IntoIterator<Item = Node>) -> Self {
        Node::List(items.into_iter().collect())
    }

    /// Builds an object node preserving entry order.
    pub fn obj(entries: impl IntoIterator<Item = (&'static str, Node)>) -> Self {
        Node::Obj(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        )
    }
}

/// A named argument attached to a field or directive.
#[derive(Clone, Debug, PartialEq)]
pub struct Arg {
    /// Argument name.
    pub name: String,
    /// Argument value.
    pub val: Node,
}

/// A directive attached to a field.
#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    /// Directive name without the `@` sigil.
    pub name: String,
    /// Directive arguments.
    pub args: Vec<Arg>,
}

/// One field of the flattened operation tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Field {
    /// Dense id; the field's index in [`Operation::fields`].
    pub id: i32,
    /// Parent field id, `-1` for roots.
    pub parent_id: i32,
    /// Field shape.
    pub typ: FieldType,
    /// Field name as written.
    pub name: String,
    /// Optional response alias.
    pub alias: Option<String>,
    /// Field arguments in declared order.
    pub args: Vec<Arg>,
    /// Field directives in declared order.
    pub directives: Vec<Directive>,
    /// Ids of this field's sub-selections in declared order.
    pub children: Vec<i32>,
}

impl Field {
    /// Returns the alias when present, the name otherwise.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A parsed operation: type tag plus a flat, id-indexed field table.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    /// Operation kind.
    pub op_type: OpType,
    /// Optional operation name.
    pub name: Option<String>,
    /// All fields, indexed by their dense ids; roots carry parent `-1`.
    pub fields: Vec<Field>,
}

impl Operation {
    /// Iterates over the root fields in declared order.
    pub fn roots(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.parent_id == -1)
    }
}
